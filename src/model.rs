//! NPUでの推論と後処理をまとめて扱うモジュール

use anyhow::{ensure, Context, Result};
use image::DynamicImage;
use log::info;

use crate::classification::{post_imgnet_classification, ClassScore, IMAGENET_TOP_MAX};
use crate::detection_result::DetectionResult;
use crate::extract::{Activation, FloatTensor};
use crate::image_format::PostParams;
use crate::img_proc::{self, Resize};
use crate::postprocess::{post_yolo_v3, YoloConfig};
use crate::raw_result::{parse_raw_result, ParserConfig};

/// 生の結果を展開するときの最大要素数 (デフォルト)
pub const RES_FLOAT_ARRAY_MAX: usize = 30000;

/// NPUデバイス
///
/// モデルの転送や設定は済んでいるものとし、入力を送って結果を受け取るだけの
/// ブロッキングなやり取りを表します
pub trait NpuDevice {
    /// 入力画像を送り、推論が終わるまで待って生の推論結果バッファを返します
    fn inference(&mut self, input: &[u8]) -> Result<Vec<u8>>;
}

/// NPU上のモデルを扱う構造体
///
/// 入力はRGB565 (1画素2バイト) の画像を前提とします。
/// 設定したパラメータは推論をまたいで書き換えません
pub struct KdpModel<D: NpuDevice> {
    device: D,
    params: PostParams,
    parser: ParserConfig,
    yolo: YoloConfig,
    top_k: usize,
    float_capacity: usize,
}

impl<D: NpuDevice> KdpModel<D> {
    /// 新しい `KdpModel` インスタンスを作成します。
    ///
    /// # Args
    /// * `device` - 推論を行うデバイス
    /// * `params` - 元画像とモデル入力のサイズ、画像フォーマット
    pub fn new(device: D, params: PostParams) -> Self {
        Self {
            device,
            params,
            parser: ParserConfig::default(),
            yolo: YoloConfig::default(),
            top_k: IMAGENET_TOP_MAX,
            float_capacity: RES_FLOAT_ARRAY_MAX,
        }
    }

    pub fn with_parser_config(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_yolo_config(mut self, yolo: YoloConfig) -> Self {
        self.yolo = yolo;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_float_capacity(mut self, capacity: usize) -> Self {
        self.float_capacity = capacity;
        self
    }

    pub fn params(&self) -> &PostParams {
        &self.params
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// 推論を実行して生の結果を受け取ります
    fn run(&mut self, input: &[u8], params: &PostParams) -> Result<Vec<u8>> {
        // RGB565 で 1画素2バイト
        let expected = params.model_width as usize * params.model_height as usize * 2;
        ensure!(
            input.len() == expected,
            "input has {} bytes, model expects {}",
            input.len(),
            expected
        );
        let res = self.device.inference(input).context("inference failed")?;
        info!("raw result: {} bytes", res.len());
        Ok(res)
    }

    /// 分類モデルを実行し、上位クラスを返します
    pub fn classify(&mut self, input: &[u8]) -> Result<Vec<ClassScore>> {
        let params = self.params;
        let res = self.run(input, &params)?;
        let nodes = parse_raw_result(&res, params.data_width(), &self.parser)?;
        let node = nodes.first().context("no output node")?;
        Ok(post_imgnet_classification(node, self.top_k))
    }

    /// YOLOv3を実行し、検出結果を返します
    pub fn detect(&mut self, input: &[u8]) -> Result<DetectionResult> {
        let params = self.params;
        self.detect_with(input, &params)
    }

    fn detect_with(&mut self, input: &[u8], params: &PostParams) -> Result<DetectionResult> {
        let res = self.run(input, params)?;
        let nodes = parse_raw_result(&res, params.data_width(), &self.parser)?;
        Ok(post_yolo_v3(&nodes, params, &self.yolo))
    }

    /// モデルを実行し、最初の出力ノードを浮動小数点数に展開して返します
    pub fn extract_floats(&mut self, input: &[u8], activation: Activation) -> Result<FloatTensor> {
        let params = self.params;
        let res = self.run(input, &params)?;
        let nodes = parse_raw_result(&res, params.data_width(), &self.parser)?;
        let node = nodes.first().context("no output node")?;
        Ok(FloatTensor::from_node(node, activation, self.float_capacity)?)
    }

    /// 画像を前処理してからYOLOv3を実行します
    ///
    /// # Args
    /// * `img` - 入力画像
    /// * `resize` - リサイズの方法
    ///
    /// # Return
    /// * 元画像の座標系での検出結果
    ///
    /// 前処理で得たパラメータはこの呼び出しの中だけで使います
    pub fn detect_image(&mut self, img: &DynamicImage, resize: Resize) -> Result<DetectionResult> {
        let pre = img_proc::preprocess(img, self.params.model_width, self.params.model_height, resize);
        let params = PostParams {
            output_format: self.params.output_format,
            ..pre.params
        };
        self.detect_with(&pre.data, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::DataWidth;
    use crate::raw_result::{build_raw_result, HeaderLayout, NodeParams};
    use anyhow::bail;

    struct MockDevice {
        result: Vec<u8>,
        calls: usize,
    }

    impl NpuDevice for MockDevice {
        fn inference(&mut self, input: &[u8]) -> Result<Vec<u8>> {
            self.calls += 1;
            if input.is_empty() {
                bail!("empty input");
            }
            Ok(self.result.clone())
        }
    }

    fn classification_result() -> Vec<u8> {
        let p = NodeParams { height: 1, channel: 3, width: 1, radix: 0, scale: 1. };
        let mut data = vec![0u8; 48];
        data[0] = 1;
        data[16] = 10;
        data[32] = 5;
        build_raw_result(&[(p, data)], DataWidth::Byte, HeaderLayout::WordCount).unwrap()
    }

    #[test]
    fn test_classify() {
        let device = MockDevice { result: classification_result(), calls: 0 };
        let mut model = KdpModel::new(device, PostParams::new(4, 4, 0)).with_top_k(2);

        let r = model.classify(&[0u8; 32]).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].index, 1);
        assert_eq!(r[1].index, 2);
        assert_eq!(model.device().calls, 1);
    }

    #[test]
    fn test_input_size_is_checked() {
        let device = MockDevice { result: classification_result(), calls: 0 };
        let mut model = KdpModel::new(device, PostParams::new(4, 4, 0));
        assert!(model.classify(&[0u8; 31]).is_err());
        assert_eq!(model.device().calls, 0);
    }

    #[test]
    fn test_extract_floats_capacity() {
        let device = MockDevice { result: classification_result(), calls: 0 };
        let mut model = KdpModel::new(device, PostParams::new(4, 4, 0));
        let t = model.extract_floats(&[0u8; 32], Activation::Linear).unwrap();
        assert_eq!(t.get(0, 0, 1), Some(10.));

        let device = MockDevice { result: classification_result(), calls: 0 };
        let mut model = KdpModel::new(device, PostParams::new(4, 4, 0)).with_float_capacity(2);
        assert!(model.extract_floats(&[0u8; 32], Activation::Linear).is_err());
    }

    #[test]
    fn test_corrupt_result_is_an_error() {
        let mut result = classification_result();
        result.truncate(30);
        let device = MockDevice { result, calls: 0 };
        let mut model = KdpModel::new(device, PostParams::new(4, 4, 0));
        let err = model.detect(&[0u8; 32]).unwrap_err();
        assert!(err.downcast_ref::<crate::error::PostProcessError>().is_some());
    }

    /// 7x7, 1クラスで (3, anchor 0, 2) だけ検出される8bitの結果
    fn yolo_result() -> Vec<u8> {
        let p = NodeParams { height: 7, channel: 18, width: 7, radix: 4, scale: 1. };
        let mut data = vec![0u8; 7 * 18 * 16];
        for r in 0..7 {
            for c in [4, 5, 10, 11, 16, 17] {
                for w in 0..7 {
                    data[(r * 18 + c) * 16 + w] = -128i8 as u8;
                }
            }
        }
        data[(3 * 18 + 4) * 16 + 2] = 35;
        data[(3 * 18 + 5) * 16 + 2] = 22;
        build_raw_result(&[(p, data)], DataWidth::Byte, HeaderLayout::WordCount).unwrap()
    }

    #[test]
    fn test_detect_image_keeps_configured_params() {
        let params = PostParams {
            raw_width: 448,
            raw_height: 448,
            model_width: 224,
            model_height: 224,
            image_format: 0,
            output_format: 0,
        };
        let device = MockDevice { result: yolo_result(), calls: 0 };
        let mut model = KdpModel::new(device, params);
        let input = vec![0u8; 224 * 224 * 2];

        let before = model.detect(&input).unwrap();
        assert_eq!(before.box_count(), 1);
        let b = before.boxes[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (79., 142., 241., 306.));

        // 32x16 の画像の座標系に変換される
        let img = DynamicImage::new_rgb8(32, 16);
        let from_img = model.detect_image(&img, Resize::Stretch).unwrap();
        assert_eq!(from_img.box_count(), 1);
        assert!(from_img.boxes[0].x2 <= 32. && from_img.boxes[0].y2 <= 16.);

        assert_eq!(model.params(), &params);
        assert_eq!(model.detect(&input).unwrap(), before);
        assert_eq!(model.device().calls, 3);
    }
}
