//! 出力ノードをそのまま浮動小数点数の配列に展開するモジュール
//!
//! 独自モデルの後処理をホスト側で書くときに使います。
//! 展開後の並びは (h, c, w) で、インデックスは `h*C*W + c*W + w` です。

use log::{error, info};

use crate::error::{PostProcessError, Result};
use crate::quantize::dequantize_with_inverse;
use crate::tensor::TensorOutputDescriptor;
use crate::utils::sigmoid;

/// 展開時に掛ける活性化関数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Sigmoid,
}

/// 出力ノードを展開します
///
/// # Args
/// * `node` - 出力ノード
/// * `activation` - 活性化関数
/// * `out` - 書き込み先
///
/// # Return
/// * 書き込んだ要素数。`out`に収まらない場合は何も書かずに0
pub fn extract_floats(node: &TensorOutputDescriptor, activation: Activation, out: &mut [f32]) -> usize {
    let len = node.len();
    if len > out.len() {
        error!(
            "neural output size {} greater than capacity {}",
            len,
            out.len()
        );
        return 0;
    }
    info!("(w, c, h) = {}, {}, {}", node.width, node.channels, node.height);

    let inv = node.quant.inverse_scale();
    let mut written = 0;
    for h in 0..node.height {
        for c in 0..node.channels {
            let base = (h * node.channels + c) * node.width;
            for (w, raw) in node.row(h, c).enumerate() {
                let v = dequantize_with_inverse(raw, inv);
                out[base + w] = match activation {
                    Activation::Linear => v,
                    Activation::Sigmoid => sigmoid(v),
                };
                written += 1;
            }
        }
    }
    written
}

/// 量子化を戻すだけで展開します
pub fn post_processing_simplest(node: &TensorOutputDescriptor, out: &mut [f32]) -> usize {
    extract_floats(node, Activation::Linear, out)
}

/// 量子化を戻してシグモイドを掛けて展開します
pub fn post_processing_sigmoid(node: &TensorOutputDescriptor, out: &mut [f32]) -> usize {
    extract_floats(node, Activation::Sigmoid, out)
}

/// 展開済みの出力ノード
#[derive(Debug, Clone, PartialEq)]
pub struct FloatTensor {
    pub height: usize,
    pub channels: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl FloatTensor {
    /// 出力ノードを展開して新たなFloatTensorを作成します。
    ///
    /// # Args
    /// * `node` - 出力ノード
    /// * `activation` - 活性化関数
    /// * `capacity` - 許容する最大要素数
    pub fn from_node(
        node: &TensorOutputDescriptor,
        activation: Activation,
        capacity: usize,
    ) -> Result<Self> {
        let len = node.len();
        if len > capacity {
            return Err(PostProcessError::CapacityExceeded { needed: len, capacity });
        }
        let mut data = vec![0.; len];
        let written = extract_floats(node, activation, &mut data);
        data.truncate(written);

        Ok(Self {
            height: node.height,
            channels: node.channels,
            width: node.width,
            data,
        })
    }

    /// (h, w, c) の値を返します
    pub fn get(&self, h: usize, w: usize, c: usize) -> Option<f32> {
        if h >= self.height || w >= self.width || c >= self.channels {
            return None;
        }
        self.data
            .get(h * self.channels * self.width + c * self.width + w)
            .copied()
    }
}
