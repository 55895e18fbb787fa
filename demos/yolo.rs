use anyhow::{Context, Result};
use std::time::Instant;

use kdp_postprocess::image_format::PostParams;
use kdp_postprocess::img_proc::Resize;
use kdp_postprocess::model::{KdpModel, NpuDevice};

/// 事前に保存しておいた推論結果を返すだけのデバイス
struct ReplayDevice {
    dump: Vec<u8>,
}

impl NpuDevice for ReplayDevice {
    fn inference(&mut self, _input: &[u8]) -> Result<Vec<u8>> {
        Ok(self.dump.clone())
    }
}

/// 使い方: `cargo run --example yolo [推論結果のダンプ] [入力画像]`
fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let dump_path = args
        .next()
        .unwrap_or_else(|| "demos/data/yolo_result.bin".to_string());
    let img_path = args.next();

    let dump = std::fs::read(&dump_path).with_context(|| format!("failed to read {}", dump_path))?;

    // 640x480 のカメラ画像を 224x224 にレターボックスしたモデル
    let params = PostParams {
        raw_width: 640,
        raw_height: 480,
        model_width: 224,
        model_height: 224,
        image_format: 0,
        output_format: 0,
    };
    let mut model = KdpModel::new(ReplayDevice { dump }, params);

    let start = Instant::now();
    let result = match img_path {
        Some(path) => {
            let img = image::open(&path).with_context(|| format!("failed to open {}", path))?;
            model.detect_image(&img, Resize::Letterbox)?
        }
        None => model.detect(&vec![0u8; 224 * 224 * 2])?,
    };
    let t = start.elapsed().as_secs_f64() * 1000.0;
    println!("Processing time:{:.03}ms", t);

    println!("{} classes, {} boxes", result.class_count, result.box_count());
    for b in &result.boxes {
        println!(
            "class {:>3} score {:.3} ({}, {}) - ({}, {})",
            b.class_index, b.score, b.x1, b.y1, b.x2, b.y2
        );
    }
    if result.dropped_candidates > 0 {
        println!("dropped {} candidates", result.dropped_candidates);
    }
    Ok(())
}
