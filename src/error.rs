//! 後処理で発生するエラーを定義するモジュール

use thiserror::Error;

/// 後処理のエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostProcessError {
    /// 生の推論結果バッファが壊れている (長さ不足、ノード数過多など)
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// 呼び出し側が用意した格納領域が足りない
    #[error("capacity exceeded: need {needed}, capacity {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },

    /// 呼び出しパラメータが不正
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, PostProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PostProcessError::MalformedInput("node 1 payload out of range".to_string());
        assert!(err.to_string().contains("malformed input"));
        assert!(err.to_string().contains("node 1"));

        let err = PostProcessError::CapacityExceeded { needed: 10, capacity: 4 };
        assert_eq!(err.to_string(), "capacity exceeded: need 10, capacity 4");
    }

    #[test]
    fn test_error_into_anyhow() {
        let err: anyhow::Error = PostProcessError::InvalidParameter("top_k".to_string()).into();
        assert!(matches!(
            err.downcast_ref::<PostProcessError>(),
            Some(PostProcessError::InvalidParameter(_))
        ));
    }
}
