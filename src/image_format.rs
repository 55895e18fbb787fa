//! 前処理の内容を後処理に伝えるためのパラメータ

use crate::quantize::DataWidth;

/// 入力画像から128を引いてNPUに入力する
pub const IMAGE_FORMAT_SUB128: u32 = 1 << 31;
/// 推論結果を後処理せずにそのままホストに返す
pub const IMAGE_FORMAT_RAW_OUTPUT: u32 = 1 << 28;
/// アスペクト比を保たずにモデル入力サイズへ変形した
pub const IMAGE_FORMAT_CHANGE_ASPECT_RATIO: u32 = 1 << 20;
/// 入力画像がRGB565
pub const NPU_FORMAT_RGB565: u32 = 0x60;

/// 出力フォーマット: サンプルが16bit
pub const OUTPUT_FORMAT_16BIT: u32 = 1;

/// バウンディングボックスを元画像の座標に戻す方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxScaling {
    /// x は元画像の幅、y は元画像の高さを掛ける (アスペクト比を変えて全面に引き伸ばした場合)
    PerAxis,
    /// x, y ともに元画像の長辺を掛ける (アスペクト比を保って左上に寄せた場合)
    LongestSide,
}

/// 1回の推論の後処理に必要なパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostParams {
    /// 元画像の幅
    pub raw_width: u32,
    /// 元画像の高さ
    pub raw_height: u32,
    /// モデル入力の幅
    pub model_width: u32,
    /// モデル入力の高さ
    pub model_height: u32,
    /// 画像フォーマットのフラグ
    pub image_format: u32,
    /// 出力フォーマット (bit0: 16bit)
    pub output_format: u32,
}

impl PostParams {
    /// 元画像とモデル入力が同じサイズの場合のパラメータ
    pub fn new(width: u32, height: u32, image_format: u32) -> Self {
        Self {
            raw_width: width,
            raw_height: height,
            model_width: width,
            model_height: height,
            image_format,
            output_format: 0,
        }
    }

    pub fn data_width(&self) -> DataWidth {
        DataWidth::from_output_format(self.output_format)
    }

    pub fn box_scaling(&self) -> BoxScaling {
        if self.image_format & IMAGE_FORMAT_CHANGE_ASPECT_RATIO != 0 {
            BoxScaling::PerAxis
        } else {
            BoxScaling::LongestSide
        }
    }

    /// 元画像の長辺
    pub fn max_len(&self) -> f32 {
        self.raw_width.max(self.raw_height) as f32
    }
}
