//! # NPU推論結果のホスト側後処理ライブラリ
//!
//! このクレートは、NPU (ニューラルプロセッサ) が返す量子化された出力テンソルを、
//! ホスト側で扱いやすい形 (クラススコアやバウンディングボックス) に変換するためのRustライブラリです。
//!
//! ## 主な機能
//!
//! 1. **推論結果バッファの解析**: 出力ノード数と各ノードの形状・量子化パラメータを読み取ります。
//! 2. **画像分類の後処理**: softmaxを掛けて上位クラスを求めます。
//! 3. **生の出力の展開**: 出力ノードを浮動小数点数の配列に展開します (シグモイドも可)。
//! 4. **YOLOv3の後処理**: 候補の抽出、クラス別のNMS、元画像の座標への変換を行います。
//!
//! ## Example
//! ```no_run
//! use kdp_postprocess::image_format::PostParams;
//! use kdp_postprocess::postprocess::{post_yolo_v3, YoloConfig};
//! use kdp_postprocess::raw_result::{parse_raw_result, ParserConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let raw = std::fs::read("demos/data/yolo_result.bin")?;  // デバイスから受け取ったバッファ
//! let params = PostParams::new(224, 224, 0);  // 8bit 出力
//! let nodes = parse_raw_result(&raw, params.data_width(), &ParserConfig::default())?;
//! let result = post_yolo_v3(&nodes, &params, &YoloConfig::default());
//! println!("{:?}", result.boxes);
//! # Ok(())
//! # }
//! ```

pub mod classification;
pub mod detection_result;
pub mod error;
pub mod extract;
pub mod image_format;
pub mod img_proc;
pub mod model;
pub mod nms;
pub mod postprocess;
pub mod quantize;
pub mod raw_result;
pub mod tensor;
pub mod utils;
