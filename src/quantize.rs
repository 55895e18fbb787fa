//! 固定小数点で量子化されたNPU出力を浮動小数点数に戻すモジュール

use crate::error::{PostProcessError, Result};

/// 1サンプルあたりのバイト数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    /// 符号あり8bit
    Byte = 1,
    /// 符号あり16bit (リトルエンディアン)
    Word = 2,
}

impl DataWidth {
    /// 出力フォーマットのbit0からサンプル幅を決めます (0: 8bit, 1: 16bit)
    pub fn from_output_format(output_format: u32) -> Self {
        if output_format & 1 == 1 {
            DataWidth::Word
        } else {
            DataWidth::Byte
        }
    }

    pub fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            1 => Ok(DataWidth::Byte),
            2 => Ok(DataWidth::Word),
            n => Err(PostProcessError::InvalidParameter(format!(
                "data width must be 1 or 2 bytes, got {}",
                n
            ))),
        }
    }

    pub fn bytes(self) -> usize {
        self as usize
    }

    /// バイト列の先頭から1サンプルを読み出します。長さが足りなければ`None`
    pub fn read(self, bytes: &[u8]) -> Option<i32> {
        match self {
            DataWidth::Byte => bytes.first().map(|&b| i32::from(b as i8)),
            DataWidth::Word => match bytes {
                [lo, hi, ..] => Some(i32::from(i16::from_le_bytes([*lo, *hi]))),
                _ => None,
            },
        }
    }
}

/// 出力ノードごとの量子化パラメータ (radix, scale)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    /// 小数部のビット数
    pub radix: u32,
    /// スケール
    pub scale: f32,
}

impl QuantParams {
    pub fn new(radix: u32, scale: f32) -> Self {
        Self { radix, scale }
    }

    /// 除算形式で1サンプルを浮動小数点数に変換します
    pub fn dequantize(&self, raw: i32) -> f32 {
        dequantize(raw, self.radix, self.scale)
    }

    /// 乗算形式で使う係数 `1 / (2^radix * scale)`
    pub fn inverse_scale(&self) -> f32 {
        1. / (2f32.powi(self.radix as i32) * self.scale)
    }
}

/// `dequantize`関数は、固定小数点のサンプルを浮動小数点数に変換します
///
/// # Args
/// * `raw` - 量子化されたサンプル
/// * `radix` - 小数部のビット数
/// * `scale` - スケール
///
/// # Return
/// * `(raw / 2^radix) / scale`
pub fn dequantize(raw: i32, radix: u32, scale: f32) -> f32 {
    (raw as f32 / 2f32.powi(radix as i32)) / scale
}

/// `dequantize`の乗算形式。ループ内では`QuantParams::inverse_scale`を先に求めてこちらを使います
pub fn dequantize_with_inverse(raw: i32, inverse_scale: f32) -> f32 {
    raw as f32 * inverse_scale
}
