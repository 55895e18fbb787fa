use log::warn;

use crate::detection_result::BoundingBox;

/// IoUの計算方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IouMode {
    /// 共通部分 / 和集合 (Jaccard)
    #[default]
    Union,
    /// 共通部分 / 各ボックスの面積 の大きい方
    Min,
}

fn overlap(l1: f32, r1: f32, l2: f32, r2: f32) -> f32 {
    r1.min(r2) - l1.max(l2)
}

fn box_intersection(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = overlap(a.x1, a.x2, b.x1, b.x2);
    let h = overlap(a.y1, a.y2, b.y1, b.y2);
    if w < 0. || h < 0. {
        return 0.;
    }
    w * h
}

fn box_union(a: &BoundingBox, b: &BoundingBox) -> f32 {
    a.area() + b.area() - box_intersection(a, b)
}

fn ratio(num: f32, den: f32) -> f32 {
    if den > 0. {
        num / den
    } else {
        0.
    }
}

/// 2つのバウンディングボックスのIoUを計算します
///
/// 面積が0のボックスが含まれる場合は0を返します
pub fn box_iou(a: &BoundingBox, b: &BoundingBox, mode: IouMode) -> f32 {
    let inter = box_intersection(a, b);
    match mode {
        IouMode::Union => ratio(inter, box_union(a, b)),
        IouMode::Min => {
            ratio(inter, box_intersection(a, a)).max(ratio(inter, box_intersection(b, b)))
        }
    }
}

/// 1クラス分のバウンディングボックスにNMSを適用します
///
/// # Args
/// * `bb` - 同じクラスのバウンディングボックス
/// * `nms_threshold` - これを超えるIoUのボックスを抑制する
/// * `mode` - IoUの計算方法
///
/// # Return
/// * スコアの降順に並んだ、抑制されずに残ったボックス
pub fn nms(bb: &[BoundingBox], nms_threshold: f32, mode: IouMode) -> Vec<BoundingBox> {
    let mut sorted_bb = bb.to_vec();
    if sorted_bb.len() < 2 {
        return sorted_bb;
    }
    // 安定ソートなので同点は入力順
    sorted_bb.sort_by(|a, b| b.score.total_cmp(&a.score));

    for ib in 0..sorted_bb.len() {
        if sorted_bb[ib].score == 0. {
            continue;
        }
        for it in (ib + 1)..sorted_bb.len() {
            if box_iou(&sorted_bb[ib], &sorted_bb[it], mode) > nms_threshold {
                sorted_bb[it].score = 0.;
            }
        }
    }
    sorted_bb.retain(|b| b.score > 0.);
    sorted_bb
}

/// NMSの結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NmsOutput {
    /// クラス順に並んだ残ったボックス
    pub boxes: Vec<BoundingBox>,
    /// クラスごとの上限を超えて捨てた数
    pub dropped: usize,
}

/// クラス別にNMSを適用します
///
/// # Args
/// * `bb` - 全クラスの候補
/// * `cls_num` - クラスの数
/// * `nms_threshold` - NMSの閾値
/// * `max_per_class` - 1クラスあたりに残す最大数
/// * `mode` - IoUの計算方法
///
/// # Return
/// * クラス0から順に、各クラスで残ったボックスを連結したもの
pub fn nms_process(
    bb: &[BoundingBox],
    cls_num: usize,
    nms_threshold: f32,
    max_per_class: usize,
    mode: IouMode,
) -> NmsOutput {
    // クラス別に分割
    let mut cls: Vec<Vec<BoundingBox>> = vec![vec![]; cls_num];
    for &detection in bb {
        match cls.get_mut(detection.class_index) {
            Some(c) => c.push(detection),
            None => warn!("class index {} out of range {}", detection.class_index, cls_num),
        }
    }

    let mut out = NmsOutput::default();
    for d in cls {
        let mut kept = nms(&d, nms_threshold, mode);
        if kept.len() > max_per_class {
            out.dropped += kept.len() - max_per_class;
            kept.truncate(max_per_class);
        }
        out.boxes.extend(kept);
    }
    if out.dropped > 0 {
        warn!("dropped {} boxes over the per-class limit {}", out.dropped, max_per_class);
    }
    out
}
