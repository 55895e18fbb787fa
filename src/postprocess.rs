//! YOLOv3の出力を後処理するためのモジュール
//!
//! 各出力ノードは1つの解像度のグリッドに対応し、チャネルは
//! アンカーごとに `(x, y, w, h, confidence, class0, class1, ...)` の順に並んでいます。

use log::{debug, info, warn};

use crate::detection_result::{BoundingBox, DetectionResult};
use crate::image_format::{BoxScaling, PostParams};
use crate::nms::{nms_process, IouMode};
use crate::quantize::dequantize_with_inverse;
use crate::tensor::TensorOutputDescriptor;
use crate::utils::sigmoid;

/// 1セルあたりのアンカーボックス数
pub const YOLO_V3_CELL_BOX_NUM: usize = 3;
/// x, y, w, h, confidence
pub const YOLO_BOX_FIX_CH: usize = 5;
/// 1回の推論で保持する候補の最大数
pub const YOLO_GOOD_BOX_MAX: usize = 2000;
/// 1クラスあたりに出力する最大数
pub const YOLO_MAX_DETECTION_PER_CLASS: usize = 100;

/// クラス確率の閾値
pub const PROB_THRESH_YOLOV3: f32 = 0.2;
/// NMSの閾値
pub const NMS_THRESH_YOLOV3: f32 = 0.45;

/// 1解像度分のアンカーボックス (幅, 高さ) × 3
pub type AnchorSet = [[f32; 2]; YOLO_V3_CELL_BOX_NUM];

/// tiny-yolo-v3 の小さいグリッド用
pub const ANCHORS_V0: AnchorSet = [[81., 82.], [135., 169.], [344., 319.]];
/// tiny-yolo-v3 の大きいグリッド用
pub const ANCHORS_V1: AnchorSet = [[23., 27.], [37., 58.], [81., 82.]];

/// YOLOv3の後処理の設定
#[derive(Debug, Clone, PartialEq)]
pub struct YoloConfig {
    /// クラス確率の閾値 (これ以上を候補にする)
    pub prob_threshold: f32,
    /// NMSの閾値 (これを超えるIoUを抑制する)
    pub nms_threshold: f32,
    /// 候補の最大数
    pub max_good_boxes: usize,
    /// 1クラスあたりの最大数
    pub max_per_class: usize,
    /// NMSで使うIoUの計算方法
    pub iou_mode: IouMode,
    /// 出力ノードごとのアンカー。ノード数より少ない場合は最後のものを使い回す
    pub anchors: Vec<AnchorSet>,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            prob_threshold: PROB_THRESH_YOLOV3,
            nms_threshold: NMS_THRESH_YOLOV3,
            max_good_boxes: YOLO_GOOD_BOX_MAX,
            max_per_class: YOLO_MAX_DETECTION_PER_CLASS,
            iou_mode: IouMode::Union,
            anchors: vec![ANCHORS_V0, ANCHORS_V1],
        }
    }
}

impl YoloConfig {
    /// `idx`番目の出力ノードに使うアンカー
    pub fn anchors_for(&self, idx: usize) -> Option<&AnchorSet> {
        self.anchors.get(idx).or(self.anchors.last())
    }
}

/// NMS前の候補
///
/// 1回の推論の間だけ使い、呼び出しをまたいで共有しません
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    /// モデルのクラス数
    pub class_count: usize,
    /// 閾値を超えた候補 (座標は元画像の座標系、丸め前)
    pub boxes: Vec<BoundingBox>,
    /// 上限に達して捨てた候補の数
    pub dropped: usize,
    cap: usize,
}

impl Candidates {
    fn new(class_count: usize, cap: usize) -> Self {
        Self {
            class_count,
            boxes: Vec::with_capacity(cap.min(YOLO_GOOD_BOX_MAX)),
            dropped: 0,
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.boxes.len() >= self.cap
    }
}

/// 出力ノードのグリッド上の位置を元画像の座標に変換するためのパラメータ
struct Geometry {
    model_w: f32,
    model_h: f32,
    scale_x: f32,
    scale_y: f32,
}

impl Geometry {
    fn new(params: &PostParams) -> Self {
        let (scale_x, scale_y) = match params.box_scaling() {
            BoxScaling::PerAxis => (params.raw_width as f32, params.raw_height as f32),
            BoxScaling::LongestSide => (params.max_len(), params.max_len()),
        };
        Self {
            model_w: params.model_width as f32,
            model_h: params.model_height as f32,
            scale_x,
            scale_y,
        }
    }
}

/// 1つの出力ノードから候補を取り出します
///
/// # Args
/// * `node` - 出力ノード
/// * `anchors` - このノードのアンカー
/// * `class_num` - クラスの数
/// * `geo` - 座標変換のパラメータ
/// * `prob_threshold` - クラス確率の閾値
/// * `cands` - 候補の追加先
fn decode_node(
    node: &TensorOutputDescriptor,
    anchors: &AnchorSet,
    class_num: usize,
    geo: &Geometry,
    prob_threshold: f32,
    cands: &mut Candidates,
) {
    let grid_w = node.width;
    let grid_h = node.height;
    let box_ch = YOLO_BOX_FIX_CH + class_num;
    let inv = node.quant.inverse_scale();

    for row in 0..grid_h {
        for (ch, anchor) in anchors.iter().enumerate() {
            let base = ch * box_ch;
            for col in 0..grid_w {
                let read = |c: usize| {
                    node.sample(row, base + c, col)
                        .map(|v| dequantize_with_inverse(v, inv))
                };

                let Some(confidence) = read(4).map(sigmoid) else {
                    continue;
                };

                // 同じ位置で複数のクラスが閾値を超えたら、座標は一度だけ計算して使い回す
                let mut shared: Option<BoundingBox> = None;
                for i in 0..class_num {
                    let Some(logit) = read(YOLO_BOX_FIX_CH + i) else {
                        continue;
                    };
                    let score = sigmoid(logit) * confidence;
                    if score < prob_threshold {
                        continue;
                    }
                    if cands.is_full() {
                        cands.dropped += 1;
                        continue;
                    }

                    if shared.is_none() {
                        let (Some(x), Some(y), Some(w), Some(h)) = (read(0), read(1), read(2), read(3))
                        else {
                            continue;
                        };
                        let cx = (sigmoid(x) + col as f32) / grid_w as f32;
                        let cy = (sigmoid(y) + row as f32) / grid_h as f32;
                        let bw = w.exp() * anchor[0] / geo.model_w;
                        let bh = h.exp() * anchor[1] / geo.model_h;
                        shared = Some(BoundingBox::from_center(cx, cy, bw, bh, geo.scale_x, geo.scale_y));
                    }
                    if let Some(b) = shared {
                        cands.boxes.push(BoundingBox { score, class_index: i, ..b });
                    }
                }
            }
        }
    }
}

/// 出力ノードのチャネル数から求めたクラス数
///
/// 大きさが0、またはチャネル数が `3 * (5 + クラス数)` の形になっていない場合は`None`
fn node_class_num(node: &TensorOutputDescriptor) -> Option<usize> {
    if node.width == 0 || node.height == 0 || node.channels % YOLO_V3_CELL_BOX_NUM != 0 {
        return None;
    }
    (node.channels / YOLO_V3_CELL_BOX_NUM)
        .checked_sub(YOLO_BOX_FIX_CH)
        .filter(|&n| n > 0)
}

/// `decode_candidates`関数は、YOLOv3の出力ノードから閾値を超えた候補を取り出します
///
/// # Args
/// * `nodes` - 出力ノード (解像度ごと)
/// * `params` - 元画像とモデル入力のサイズ、画像フォーマット
/// * `config` - 閾値やアンカーなどの設定
///
/// # Return
/// * NMS前の候補。`config.max_good_boxes`を超えた分は捨てて数だけ数えます
///
/// クラス数は最初の正しい形の出力ノードから求め、形がおかしいノードや
/// クラス数が合わないノードは候補0件として読み飛ばします
pub fn decode_candidates(
    nodes: &[TensorOutputDescriptor],
    params: &PostParams,
    config: &YoloConfig,
) -> Candidates {
    let Some(class_num) = nodes.iter().find_map(node_class_num) else {
        warn!("no decodable output node in {} nodes", nodes.len());
        return Candidates::default();
    };

    let mut cands = Candidates::new(class_num, config.max_good_boxes);
    if params.model_width == 0 || params.model_height == 0 {
        warn!(
            "model input size {}x{} is invalid",
            params.model_width, params.model_height
        );
        return cands;
    }

    let geo = Geometry::new(params);

    for (idx, node) in nodes.iter().enumerate() {
        if node_class_num(node) != Some(class_num) {
            warn!(
                "output node {} has invalid shape (h, c, w) = ({}, {}, {}) for {} classes, skipped",
                idx, node.height, node.channels, node.width, class_num
            );
            continue;
        }
        let Some(anchors) = config.anchors_for(idx) else {
            warn!("no anchors for output node {}, skipped", idx);
            continue;
        };
        decode_node(node, anchors, class_num, &geo, config.prob_threshold, &mut cands);
    }

    if cands.dropped > 0 {
        warn!(
            "allocate more memory for maximum good detection: limit {}, dropped {}",
            config.max_good_boxes, cands.dropped
        );
    }
    cands
}

/// `post_yolo_v3`関数は、YOLOv3の出力ノードから物体検出を行います
///
/// # Args
/// * `nodes` - 出力ノード (解像度ごと)
/// * `params` - 元画像とモデル入力のサイズ、画像フォーマット
/// * `config` - 閾値やアンカーなどの設定
///
/// # Return
/// * 検出結果。ボックスはクラス順に並び、座標は元画像の範囲に収めてあります
pub fn post_yolo_v3(
    nodes: &[TensorOutputDescriptor],
    params: &PostParams,
    config: &YoloConfig,
) -> DetectionResult {
    let cands = decode_candidates(nodes, params, config);

    let nms_out = nms_process(
        &cands.boxes,
        cands.class_count,
        config.nms_threshold,
        config.max_per_class,
        config.iou_mode,
    );

    let result = DetectionResult {
        class_count: cands.class_count,
        boxes: nms_out
            .boxes
            .iter()
            .map(|b| b.clamp_to_image(params.raw_width, params.raw_height))
            .collect(),
        dropped_candidates: cands.dropped,
        dropped_per_class: nms_out.dropped,
    };

    info!("good_result_count: {}", result.box_count());
    if let Some(b) = result.first_box() {
        debug!(
            "first Box(x1, y1, x2, y2, score, class) = {}, {}, {}, {}, {}, {}",
            b.x1, b.y1, b.x2, b.y2, b.score, b.class_index
        );
    }
    result
}
