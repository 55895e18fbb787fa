//! NPUの出力ノード1つ分を表すモジュール
//!
//! 出力テンソルは (height, channel, width) の順に並んでおり、
//! width方向の1行は16バイトの倍数にパディングされています。

use crate::error::{PostProcessError, Result};
use crate::quantize::{DataWidth, QuantParams};
use crate::utils::round_up;

/// 出力ノード1つ分の記述子
///
/// `payload`は生の推論結果バッファの一部を借用しているだけで、所有はしません
#[derive(Debug, Clone, Copy)]
pub struct TensorOutputDescriptor<'a> {
    /// 高さ
    pub height: usize,
    /// チャネル数
    pub channels: usize,
    /// 幅
    pub width: usize,
    /// 量子化パラメータ
    pub quant: QuantParams,
    /// 1サンプルあたりのバイト数
    pub data_width: DataWidth,
    payload: &'a [u8],
}

impl<'a> TensorOutputDescriptor<'a> {
    /// 新しい記述子を作成します。
    ///
    /// # Args
    /// * `height`, `channels`, `width` - テンソルの形状
    /// * `quant` - 量子化パラメータ
    /// * `data_width` - 1サンプルあたりのバイト数
    /// * `payload` - このノードのデータ (パディング込み)
    ///
    /// # Return
    /// * `payload`が形状に対して短い場合は`MalformedInput`
    pub fn new(
        height: usize,
        channels: usize,
        width: usize,
        quant: QuantParams,
        data_width: DataWidth,
        payload: &'a [u8],
    ) -> Result<Self> {
        let needed = Self::segment_size(height, channels, width, data_width).ok_or_else(|| {
            PostProcessError::MalformedInput(format!(
                "tensor shape overflows: h={} c={} w={}",
                height, channels, width
            ))
        })?;
        if payload.len() < needed {
            return Err(PostProcessError::MalformedInput(format!(
                "payload has {} bytes, shape (h={}, c={}, w={}) needs {}",
                payload.len(),
                height,
                channels,
                width,
                needed
            )));
        }

        Ok(Self {
            height,
            channels,
            width,
            quant,
            data_width,
            payload: &payload[..needed],
        })
    }

    /// パディング込みのノードのバイト数 `channel * height * round_up(width * data_size)`
    pub fn segment_size(
        height: usize,
        channels: usize,
        width: usize,
        data_width: DataWidth,
    ) -> Option<usize> {
        let row = width.checked_mul(data_width.bytes())?.checked_add(15)? & !15;
        channels.checked_mul(height)?.checked_mul(row)
    }

    /// 1行 (width方向) のバイト数。パディングを含みます
    pub fn row_stride(&self) -> usize {
        round_up(self.width * self.data_width.bytes())
    }

    /// 要素数 `height * channels * width`
    pub fn len(&self) -> usize {
        self.height * self.channels * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// (h, c, w) の位置にある量子化されたサンプルを読み出します
    pub fn sample(&self, h: usize, c: usize, w: usize) -> Option<i32> {
        if h >= self.height || c >= self.channels || w >= self.width {
            return None;
        }
        let offset = (h * self.channels + c) * self.row_stride() + w * self.data_width.bytes();
        self.data_width.read(self.payload.get(offset..)?)
    }

    /// (h, c, w) の位置にあるサンプルを浮動小数点数に変換して返します
    pub fn dequantized(&self, h: usize, c: usize, w: usize) -> Option<f32> {
        self.sample(h, c, w).map(|raw| self.quant.dequantize(raw))
    }

    /// (h, c) の1行分のサンプルを順に返すイテレータ。パディングは読み飛ばします
    pub fn row(&self, h: usize, c: usize) -> impl Iterator<Item = i32> + 'a {
        let data_width = self.data_width;
        let step = data_width.bytes();
        let (start, count) = if h < self.height && c < self.channels {
            ((h * self.channels + c) * self.row_stride(), self.width)
        } else {
            (0, 0)
        };
        let row = self.payload.get(start..start + count * step).unwrap_or(&[]);
        row.chunks_exact(step).filter_map(move |s| data_width.read(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q() -> QuantParams {
        QuantParams::new(0, 1.)
    }

    #[test]
    fn test_segment_size() {
        assert_eq!(TensorOutputDescriptor::segment_size(1, 3, 1, DataWidth::Byte), Some(48));
        assert_eq!(TensorOutputDescriptor::segment_size(7, 18, 7, DataWidth::Word), Some(7 * 18 * 16));
        assert_eq!(TensorOutputDescriptor::segment_size(2, 2, 17, DataWidth::Byte), Some(2 * 2 * 32));
        assert_eq!(TensorOutputDescriptor::segment_size(usize::MAX, 2, 1, DataWidth::Byte), None);
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let buf = [0u8; 47];
        let err = TensorOutputDescriptor::new(1, 3, 1, q(), DataWidth::Byte, &buf).unwrap_err();
        assert!(matches!(err, PostProcessError::MalformedInput(_)));
    }

    #[test]
    fn test_strided_read() {
        // h=1, c=2, w=3: 各行は16バイト
        let mut buf = [0u8; 32];
        buf[..3].copy_from_slice(&[1, 2, 3]);
        buf[16..19].copy_from_slice(&[4, 5, 0xfb]);
        let d = TensorOutputDescriptor::new(1, 2, 3, q(), DataWidth::Byte, &buf).unwrap();

        assert_eq!(d.row_stride(), 16);
        assert_eq!(d.sample(0, 0, 2), Some(3));
        assert_eq!(d.sample(0, 1, 0), Some(4));
        assert_eq!(d.sample(0, 1, 2), Some(-5));
        assert_eq!(d.sample(0, 2, 0), None);
        assert_eq!(d.sample(0, 0, 3), None);
        assert_eq!(d.row(0, 1).collect::<Vec<_>>(), vec![4, 5, -5]);
        assert_eq!(d.row(1, 0).count(), 0);
    }

    #[test]
    fn test_word_samples() {
        let mut buf = [0u8; 16];
        buf[..4].copy_from_slice(&[0x00, 0x01, 0xff, 0xff]);
        let d = TensorOutputDescriptor::new(1, 1, 2, QuantParams::new(8, 1.), DataWidth::Word, &buf)
            .unwrap();
        assert_eq!(d.sample(0, 0, 0), Some(256));
        assert_eq!(d.dequantized(0, 0, 0), Some(1.));
        assert_eq!(d.sample(0, 0, 1), Some(-1));
    }
}
