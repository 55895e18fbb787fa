//! 画像分類モデルの出力を後処理するモジュール

use log::{debug, warn};

use crate::tensor::TensorOutputDescriptor;
use crate::utils::softmax;

/// 結果として残す上位クラス数 (デフォルト)
pub const IMAGENET_TOP_MAX: usize = 5;
/// 扱えるクラス数の上限
pub const IMAGENET_CLASSES_MAX: usize = 1000;

/// クラスとスコアの組
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScore {
    /// クラス番号 (チャネル番号)
    pub index: usize,
    /// softmax後の確率
    pub score: f32,
}

/// `post_imgnet_classification`関数は、1x1xCの出力ノードから上位`top_k`クラスを求めます
///
/// # Args
/// * `node` - 分類結果の出力ノード。(0, c, 0) の位置に各クラスのスコアがある
/// * `top_k` - 残すクラス数
///
/// # Return
/// * スコアの降順に並んだ最大`min(top_k, C)`個のクラス。同点はクラス番号の昇順
pub fn post_imgnet_classification(node: &TensorOutputDescriptor, top_k: usize) -> Vec<ClassScore> {
    let ch = node.channels.min(IMAGENET_CLASSES_MAX);
    if ch < node.channels {
        warn!(
            "classification node has {} channels, only the first {} are used",
            node.channels, ch
        );
    }

    let mut scores: Vec<f32> = (0..ch)
        .map_while(|c| node.dequantized(0, c, 0))
        .collect();
    softmax(&mut scores);

    let mut result: Vec<ClassScore> = scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| ClassScore { index, score })
        .collect();
    // 安定ソートなので同点はチャネル順のまま
    result.sort_by(|a, b| b.score.total_cmp(&a.score));
    result.truncate(top_k);

    if let Some(top) = result.first() {
        debug!("top1: class {} score {}", top.index, top.score);
    }
    result
}
