use anyhow::{Context, Result};

use kdp_postprocess::classification::{post_imgnet_classification, IMAGENET_TOP_MAX};
use kdp_postprocess::extract::{Activation, FloatTensor};
use kdp_postprocess::model::RES_FLOAT_ARRAY_MAX;
use kdp_postprocess::quantize::DataWidth;
use kdp_postprocess::raw_result::{parse_raw_result, ParserConfig};

/// 使い方: `cargo run --example classification [推論結果のダンプ]`
fn main() -> Result<()> {
    let dump_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/data/classification_result.bin".to_string());

    // 8bit 出力のモデル
    let raw = std::fs::read(&dump_path).with_context(|| format!("failed to read {}", dump_path))?;
    let nodes = parse_raw_result(&raw, DataWidth::Byte, &ParserConfig::default())?;
    let node = nodes.first().context("no output node")?;
    println!(
        "output node: (h, c, w) = ({}, {}, {})",
        node.height, node.channels, node.width
    );

    for (rank, s) in post_imgnet_classification(node, IMAGENET_TOP_MAX).iter().enumerate() {
        println!("top{}: class {:>4} {:.4}", rank + 1, s.index, s.score);
    }

    // 生の値も展開して先頭だけ表示
    let floats = FloatTensor::from_node(node, Activation::Linear, RES_FLOAT_ARRAY_MAX)?;
    for (i, v) in floats.data.iter().take(10).enumerate() {
        println!("raw[{}] = {}", i, v);
    }
    Ok(())
}
