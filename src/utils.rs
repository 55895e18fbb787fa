//! 後処理で共通に使う数値関数

/// NPU出力の1行あたりのアライメント (バイト, 128bit)
pub const KDP_COL_MIN: usize = 16;

/// `round_up`関数は、バイト数を`KDP_COL_MIN`の倍数に切り上げます
///
/// # Args
/// * `num` - 切り上げるバイト数
///
/// # Return
/// * 16の倍数に切り上げたバイト数
pub fn round_up(num: usize) -> usize {
    (num + (KDP_COL_MIN - 1)) & !(KDP_COL_MIN - 1)
}

/// シグモイド関数
pub fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

/// `softmax`関数は、スコアの配列を確率分布に変換します (in-place)
///
/// 最大値を引いてから指数を取るので、大きな値が入っても溢れません
///
/// # Args
/// * `scores` - 変換するスコア
pub fn softmax(scores: &mut [f32]) {
    let Some(m) = scores.iter().copied().reduce(f32::max) else {
        return;
    };

    let sum: f32 = scores.iter().map(|&s| (s - m).exp()).sum();
    let log_sum = sum.ln();

    for s in scores.iter_mut() {
        *s = (*s - m - log_sum).exp();
    }
}
