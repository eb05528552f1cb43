/// DPM 车辆检测 + 跟踪
///
/// 按顺序读取图像序列 (视为同一路视频流), 逐帧检测并跟踪确认
///
/// 主程序入口 - 直接运行: cargo run --bin dpm_detect --release -- images/*.png
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dpm_rs::output::{id_to_color, write_kitti, ImageObjects};
use dpm_rs::{gen_time_string, DetectionSet, DetectionStream, DetectorConfig};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// DPM 检测程序参数
#[derive(Parser, Debug)]
#[command(author, version, about = "DPM 车辆检测与跟踪", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "dpm_config.json")]
    config: PathBuf,

    /// KITTI 格式结果输出文件
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 打印每帧的 JSON 消息
    #[arg(long)]
    json: bool,

    /// 绘制检测框后保存到该目录
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// 输入图像 (按帧顺序)
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = DetectorConfig::load(&args.config);
    config.print_summary();

    let mut stream = DetectionStream::new(&config)?;
    let class_names: Vec<String> = stream.class_names().iter().map(|s| s.to_string()).collect();
    let names: Vec<&str> = class_names.iter().map(String::as_str).collect();

    let mut kitti = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("无法创建输出文件: {}", path.display()))?,
        )),
        None => None,
    };
    if let Some(dir) = &args.save_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建目录: {}", dir.display()))?;
    }

    info!("🚀 开始处理 {} 帧 ({})", args.images.len(), gen_time_string("-"));
    let mut total_ms = 0.0;
    for path in &args.images {
        let image = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                warn!("⚠️ 图像读取失败 {}: {}", path.display(), e);
                continue;
            }
        };

        let out = stream.process_frame(&image);
        total_ms += out.detect_ms + out.track_ms;
        info!(
            "🎯 帧 {} {}: 检测 {} / 确认 {} | 检测 {:.1}ms 跟踪 {:.2}ms",
            out.frame_id,
            path.display(),
            out.raw.len(),
            out.confirmed.len(),
            out.detect_ms,
            out.track_ms
        );

        if let Some(writer) = kitti.as_mut() {
            write_kitti(writer, out.frame_id, &out.confirmed, &names)?;
        }
        if args.json {
            let msg = ImageObjects::from_detections(&out.confirmed);
            println!("{}", serde_json::to_string(&msg)?);
        }
        if let Some(dir) = &args.save_dir {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = dir.join(name);
            draw_detections(image, &out.raw, &out.confirmed, stream.tracker())
                .save(&target)
                .with_context(|| format!("无法保存图像: {}", target.display()))?;
        }
    }

    if let Some(mut writer) = kitti {
        writer.flush()?;
    }
    let frames = stream.tracker().frame_count();
    if frames > 0 {
        info!(
            "✅ 完成: {} 帧, 平均 {:.1}ms/帧 | {}",
            frames,
            total_ms / frames as f64,
            stream.tracker().stats()
        );
    }
    stream.close();
    Ok(())
}

/// 原始检测画灰框, 已确认目标按轨迹ID着色
fn draw_detections(
    mut image: RgbImage,
    raw: &DetectionSet,
    confirmed: &DetectionSet,
    tracker: &dpm_rs::Tracker,
) -> RgbImage {
    let rect = |corners: [i32; 4]| {
        let [x1, y1, x2, y2] = corners;
        Rect::at(x1, y1).of_size((x2 - x1).max(1) as u32, (y2 - y1).max(1) as u32)
    };

    for det in raw {
        draw_hollow_rect_mut(&mut image, rect(det.bbox.corners()), Rgb([128, 128, 128]));
    }

    // 已确认输出与已确认轨迹按 ID 顺序一一对应
    let ids = tracker
        .tracks()
        .iter()
        .filter(|t| t.is_confirmed())
        .map(|t| t.id);
    let mut ids: Vec<u32> = ids.collect();
    ids.sort_unstable();
    for (det, id) in confirmed.iter().zip(ids) {
        let (r, g, b) = id_to_color(id);
        draw_hollow_rect_mut(&mut image, rect(det.bbox.corners()), Rgb([r, g, b]));
    }
    image
}
