#![allow(dead_code)]

use kdp_postprocess::quantize::DataWidth;
use kdp_postprocess::raw_result::{build_raw_result, HeaderLayout, NodeParams};
use kdp_postprocess::utils::round_up;

/// 1つの出力ノードのデータを (h, c, w) の順に並べて作ります。値は `f(h, c, w)`
pub fn node_data(
    p: &NodeParams,
    data_width: DataWidth,
    f: impl Fn(usize, usize, usize) -> i16,
) -> Vec<u8> {
    let (h, c, w) = (p.height as usize, p.channel as usize, p.width as usize);
    let step = data_width.bytes();
    let stride = round_up(w * step);
    // パディング部分はわざと0以外で埋める
    let mut buf = vec![0x5au8; h * c * stride];
    for hh in 0..h {
        for cc in 0..c {
            for ww in 0..w {
                let off = (hh * c + cc) * stride + ww * step;
                let v = f(hh, cc, ww);
                match data_width {
                    DataWidth::Byte => buf[off] = v as i8 as u8,
                    DataWidth::Word => buf[off..off + 2].copy_from_slice(&v.to_le_bytes()),
                }
            }
        }
    }
    buf
}

pub fn raw_result(
    nodes: Vec<(NodeParams, Vec<u8>)>,
    data_width: DataWidth,
) -> Vec<u8> {
    build_raw_result(&nodes, data_width, HeaderLayout::WordCount).unwrap()
}

pub fn yolo_params(grid: u32, classes: u32, radix: u32) -> NodeParams {
    NodeParams {
        height: grid,
        channel: 3 * (5 + classes),
        width: grid,
        radix,
        scale: 1.,
    }
}
