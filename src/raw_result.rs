//! NPUから受け取った生の推論結果バッファを解析するモジュール
//!
//! バッファの構成:
//! ```text
//! 出力ノード数 N
//! N × { height: u32, channel: u32, width: u32, radix: u32, scale: f32 }  (リトルエンディアン, 20バイト)
//! N × ノードデータ (channel * height * round_up(width * data_size) バイト)
//! ```

use log::debug;

use crate::error::{PostProcessError, Result};
use crate::quantize::{DataWidth, QuantParams};
use crate::tensor::TensorOutputDescriptor;

/// ノード情報レコード1つ分のバイト数
pub const NODE_PARAMS_SIZE: usize = 20;

/// 出力ノード数の上限 (デフォルト)
pub const MAX_OUTPUT_NODES: usize = 50;

/// 出力ノード数がどのように格納されているか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// 4バイトのワードに格納 (下位1バイトだけが意味を持つ)。ホストSDKが返す形式
    WordCount,
    /// 1バイトだけ格納し、直後にレコードが続く
    ByteCount,
}

impl HeaderLayout {
    fn count_size(self) -> usize {
        match self {
            HeaderLayout::WordCount => 4,
            HeaderLayout::ByteCount => 1,
        }
    }
}

/// パーサの設定
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// 受け付ける出力ノード数の上限
    pub max_nodes: usize,
    /// ヘッダの形式
    pub layout: HeaderLayout,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_nodes: MAX_OUTPUT_NODES,
            layout: HeaderLayout::WordCount,
        }
    }
}

/// ノード情報レコード
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeParams {
    pub height: u32,
    pub channel: u32,
    pub width: u32,
    pub radix: u32,
    pub scale: f32,
}

impl NodeParams {
    fn from_le_bytes(rec: &[u8; NODE_PARAMS_SIZE]) -> Self {
        let word = |i: usize| [rec[i], rec[i + 1], rec[i + 2], rec[i + 3]];
        Self {
            height: u32::from_le_bytes(word(0)),
            channel: u32::from_le_bytes(word(4)),
            width: u32::from_le_bytes(word(8)),
            radix: u32::from_le_bytes(word(12)),
            scale: f32::from_le_bytes(word(16)),
        }
    }

    /// レコードをリトルエンディアンのバイト列にします
    pub fn to_le_bytes(&self) -> [u8; NODE_PARAMS_SIZE] {
        let mut out = [0u8; NODE_PARAMS_SIZE];
        out[0..4].copy_from_slice(&self.height.to_le_bytes());
        out[4..8].copy_from_slice(&self.channel.to_le_bytes());
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.radix.to_le_bytes());
        out[16..20].copy_from_slice(&self.scale.to_le_bytes());
        out
    }
}

fn malformed(msg: String) -> PostProcessError {
    PostProcessError::MalformedInput(msg)
}

/// `parse_raw_result`関数は、生の推論結果バッファから出力ノードの記述子を作成します
///
/// # Args
/// * `buf` - 生の推論結果バッファ
/// * `data_width` - 1サンプルあたりのバイト数 (バッファには含まれない)
/// * `config` - パーサの設定
///
/// # Return
/// * 出力ノードの記述子 (バッファ内の順)
/// * ノード数が上限を超えている、またはデータがバッファの外を指している場合は`MalformedInput`
pub fn parse_raw_result<'a>(
    buf: &'a [u8],
    data_width: DataWidth,
    config: &ParserConfig,
) -> Result<Vec<TensorOutputDescriptor<'a>>> {
    let count_size = config.layout.count_size();
    let &node_num = buf
        .first()
        .ok_or_else(|| malformed("empty result buffer".to_string()))?;
    let node_num = node_num as usize;

    if node_num > config.max_nodes {
        return Err(malformed(format!(
            "output node count {} exceeds maximum {}",
            node_num, config.max_nodes
        )));
    }

    let header_size = count_size + node_num * NODE_PARAMS_SIZE;
    if buf.len() < header_size {
        return Err(malformed(format!(
            "header needs {} bytes for {} nodes, buffer has {}",
            header_size,
            node_num,
            buf.len()
        )));
    }

    let mut offset = header_size;
    let mut nodes = Vec::with_capacity(node_num);

    for (i, rec) in buf[count_size..header_size]
        .chunks_exact(NODE_PARAMS_SIZE)
        .enumerate()
    {
        let mut raw = [0u8; NODE_PARAMS_SIZE];
        raw.copy_from_slice(rec);
        let p = NodeParams::from_le_bytes(&raw);

        let (h, c, w) = (p.height as usize, p.channel as usize, p.width as usize);
        let size = TensorOutputDescriptor::segment_size(h, c, w, data_width)
            .ok_or_else(|| malformed(format!("node {} shape overflows: {:?}", i, p)))?;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                malformed(format!(
                    "node {} payload [{}, +{}) exceeds buffer length {}",
                    i,
                    offset,
                    size,
                    buf.len()
                ))
            })?;

        debug!(
            "node {}: (h, c, w) = ({}, {}, {}), radix = {}, scale = {}, offset = {}",
            i, h, c, w, p.radix, p.scale, offset
        );

        let quant = QuantParams::new(p.radix, p.scale);
        nodes.push(TensorOutputDescriptor::new(h, c, w, quant, data_width, &buf[offset..end])?);
        offset = end;
    }

    Ok(nodes)
}

/// `build_raw_result`関数は、`parse_raw_result`が読めるバッファを組み立てます
///
/// 各ノードのデータはパディング込みの長さであることを確認します
///
/// # Args
/// * `nodes` - ノード情報とデータの組
/// * `data_width` - 1サンプルあたりのバイト数
/// * `layout` - ヘッダの形式
pub fn build_raw_result(
    nodes: &[(NodeParams, Vec<u8>)],
    data_width: DataWidth,
    layout: HeaderLayout,
) -> Result<Vec<u8>> {
    let node_num = u8::try_from(nodes.len())
        .map_err(|_| PostProcessError::InvalidParameter(format!("{} nodes", nodes.len())))?;

    let mut buf = vec![0u8; layout.count_size()];
    buf[0] = node_num;
    for (p, _) in nodes {
        buf.extend_from_slice(&p.to_le_bytes());
    }
    for (i, (p, data)) in nodes.iter().enumerate() {
        let size = TensorOutputDescriptor::segment_size(
            p.height as usize,
            p.channel as usize,
            p.width as usize,
            data_width,
        );
        if size != Some(data.len()) {
            return Err(PostProcessError::InvalidParameter(format!(
                "node {} data has {} bytes, expected {:?}",
                i,
                data.len(),
                size
            )));
        }
        buf.extend_from_slice(data);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(h: u32, c: u32, w: u32) -> NodeParams {
        NodeParams { height: h, channel: c, width: w, radix: 2, scale: 0.5 }
    }

    #[test]
    fn test_parse_two_nodes() {
        let a = params(1, 3, 1);
        let b = params(2, 2, 20);
        let mut data_a = vec![0u8; 48];
        data_a[16] = 7;
        let mut data_b = vec![0u8; 2 * 2 * 32];
        data_b[32 + 19] = 0xff;
        let buf = build_raw_result(
            &[(a, data_a), (b, data_b)],
            DataWidth::Byte,
            HeaderLayout::WordCount,
        )
        .unwrap();

        let nodes = parse_raw_result(&buf, DataWidth::Byte, &ParserConfig::default()).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!((nodes[0].height, nodes[0].channels, nodes[0].width), (1, 3, 1));
        assert_eq!(nodes[0].quant, QuantParams::new(2, 0.5));
        assert_eq!(nodes[0].sample(0, 1, 0), Some(7));
        assert_eq!(nodes[1].sample(0, 1, 19), Some(-1));
        assert_eq!(nodes[1].payload().len(), 128);
    }

    #[test]
    fn test_parse_byte_count_layout() {
        let buf = build_raw_result(
            &[(params(1, 1, 1), vec![5u8; 16])],
            DataWidth::Byte,
            HeaderLayout::ByteCount,
        )
        .unwrap();
        assert_eq!(buf.len(), 1 + NODE_PARAMS_SIZE + 16);

        let config = ParserConfig { layout: HeaderLayout::ByteCount, ..Default::default() };
        let nodes = parse_raw_result(&buf, DataWidth::Byte, &config).unwrap();
        assert_eq!(nodes[0].sample(0, 0, 0), Some(5));
    }

    #[test]
    fn test_too_many_nodes() {
        let mut buf = vec![0u8; 4 + 60 * NODE_PARAMS_SIZE];
        buf[0] = 60;
        let err = parse_raw_result(&buf, DataWidth::Byte, &ParserConfig::default()).unwrap_err();
        assert!(matches!(err, PostProcessError::MalformedInput(_)));
    }

    #[test]
    fn test_truncated_header() {
        let buf = [2u8, 0, 0, 0, 1, 0];
        assert!(parse_raw_result(&buf, DataWidth::Byte, &ParserConfig::default()).is_err());
        assert!(parse_raw_result(&[], DataWidth::Byte, &ParserConfig::default()).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = build_raw_result(
            &[(params(7, 18, 7), vec![0u8; 7 * 18 * 16])],
            DataWidth::Byte,
            HeaderLayout::WordCount,
        )
        .unwrap();
        buf.truncate(buf.len() - 1);
        let err = parse_raw_result(&buf, DataWidth::Byte, &ParserConfig::default()).unwrap_err();
        assert!(err.to_string().contains("node 0"));
    }

    #[test]
    fn test_data_width_changes_segment_size() {
        // 16bitだと width 10 は 20バイト → 32バイトに切り上げ
        let buf = build_raw_result(
            &[(params(1, 1, 10), vec![0u8; 32])],
            DataWidth::Word,
            HeaderLayout::WordCount,
        )
        .unwrap();
        assert!(parse_raw_result(&buf, DataWidth::Word, &ParserConfig::default()).is_ok());
        assert!(build_raw_result(
            &[(params(1, 1, 10), vec![0u8; 16])],
            DataWidth::Word,
            HeaderLayout::WordCount
        )
        .is_err());
    }
}
