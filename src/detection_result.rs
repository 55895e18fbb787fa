//! 物体検出の結果を表すモジュール

/// 検出されたバウンディングボックス
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// バウンディングボックス左上のx
    pub x1: f32,
    /// バウンディングボックス左上のy
    pub y1: f32,
    /// バウンディングボックス右下のx
    pub x2: f32,
    /// バウンディングボックス右下のy
    pub y2: f32,
    /// クラスのスコア (コンフィデンス込み, 0〜1)
    pub score: f32,
    /// クラス
    pub class_index: usize,
}

impl BoundingBox {
    /// 中心座標と大きさから新しいBoundingBoxを作成します。
    ///
    /// # Args
    /// * `cx`, `cy` - 中心座標
    /// * `w`, `h` - 幅と高さ
    /// * `scale_x`, `scale_y` - 各軸に掛ける倍率
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x1: (cx - w / 2.) * scale_x,
            y1: (cy - h / 2.) * scale_y,
            x2: (cx + w / 2.) * scale_x,
            y2: (cy + h / 2.) * scale_y,
            score: 0.,
            class_index: 0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 座標を整数に丸めて画像の範囲に収めます。
    ///
    /// 丸めは0.5を足して0方向に切り捨てます。x1, y1は0未満を0に、
    /// x2, y2は画像の幅・高さを超えたものを幅・高さにします。
    ///
    /// # Args
    /// * `width` - 元画像の幅
    /// * `height` - 元画像の高さ
    pub fn clamp_to_image(&self, width: u32, height: u32) -> Self {
        let round = |v: f32| (v + 0.5).trunc();
        Self {
            x1: round(self.x1).max(0.),
            y1: round(self.y1).max(0.),
            x2: round(self.x2).min(width as f32),
            y2: round(self.y2).min(height as f32),
            ..*self
        }
    }
}

/// 1回の推論の検出結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    /// モデルのクラス数
    pub class_count: usize,
    /// クラスごとにまとめられた、NMS後に残ったバウンディングボックス
    pub boxes: Vec<BoundingBox>,
    /// 候補の上限に達して捨てた候補の数
    pub dropped_candidates: usize,
    /// クラスごとの上限に達して捨てたバウンディングボックスの数
    pub dropped_per_class: usize,
}

impl DetectionResult {
    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    pub fn first_box(&self) -> Option<&BoundingBox> {
        self.boxes.first()
    }

    /// 指定したクラスのバウンディングボックスを返します
    pub fn boxes_of_class(&self, class_index: usize) -> impl Iterator<Item = &BoundingBox> {
        self.boxes.iter().filter(move |b| b.class_index == class_index)
    }
}
