//! NPUに入力する画像を作る前処理モジュール
//!
//! 後処理でボックスを元画像の座標に戻すには、前処理でどのように
//! 変形したかを知る必要があるので、画像と一緒に`PostParams`を返します。

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::image_format::{PostParams, IMAGE_FORMAT_CHANGE_ASPECT_RATIO, IMAGE_FORMAT_SUB128, NPU_FORMAT_RGB565};

/// 前処理の方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// アスペクト比を保って縮小し、左上に寄せて右と下を0で埋める
    Letterbox,
    /// アスペクト比を無視してモデル入力サイズに引き伸ばす
    Stretch,
}

/// 前処理済みの入力
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// RGB565 (リトルエンディアン) の画素データ
    pub data: Vec<u8>,
    /// 後処理に渡すパラメータ
    pub params: PostParams,
}

/// 画像をアスペクト比を保ってリサイズし、左上に配置した画像を作ります
///
/// # Args
/// * `img` - 入力画像
/// * `width`, `height` - モデル入力のサイズ
///
/// # Return
/// * `width`×`height`のRGB画像
pub fn letterbox_img(img: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let resized = img.resize(width, height, FilterType::Nearest).to_rgb8();

    let mut new_img = RgbImage::new(width, height);
    imageops::replace(&mut new_img, &resized, 0, 0);
    new_img
}

/// 画像をモデル入力のサイズに引き伸ばします
pub fn stretch_img(img: &DynamicImage, width: u32, height: u32) -> RgbImage {
    img.resize_exact(width, height, FilterType::Nearest).to_rgb8()
}

/// RGB画像をRGB565のバイト列に変換します
pub fn to_rgb565(img: &RgbImage) -> Vec<u8> {
    img.pixels()
        .flat_map(|p| {
            let r = u16::from(p[0] >> 3);
            let g = u16::from(p[1] >> 2);
            let b = u16::from(p[2] >> 3);
            ((r << 11) | (g << 5) | b).to_le_bytes()
        })
        .collect()
}

/// `preprocess`関数は、画像をNPUの入力データと後処理用パラメータに変換します
///
/// # Args
/// * `img` - 入力画像
/// * `model_width`, `model_height` - モデル入力のサイズ
/// * `resize` - リサイズの方法
///
/// # Return
/// * RGB565の入力データと、対応する`PostParams`
pub fn preprocess(img: &DynamicImage, model_width: u32, model_height: u32, resize: Resize) -> Preprocessed {
    let mut image_format = IMAGE_FORMAT_SUB128 | NPU_FORMAT_RGB565;
    let rgb = match resize {
        Resize::Letterbox => letterbox_img(img, model_width, model_height),
        Resize::Stretch => {
            image_format |= IMAGE_FORMAT_CHANGE_ASPECT_RATIO;
            stretch_img(img, model_width, model_height)
        }
    };

    Preprocessed {
        data: to_rgb565(&rgb),
        params: PostParams {
            raw_width: img.width(),
            raw_height: img.height(),
            model_width,
            model_height,
            image_format,
            output_format: 0,
        },
    }
}
