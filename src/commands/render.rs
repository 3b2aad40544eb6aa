use crate::address::CellRange;
use crate::api::{RemoteFile, RenderedImage};
use crate::args::RenderArgs;
use crate::commands::{Backend, Out};
use crate::{utils, Config, Result};
use anyhow::{bail, Context};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

const CELL_WIDTH_PX: u32 = 64;
const CELL_HEIGHT_PX: u32 = 15;
/// Images beyond this edge length get downscaled by vision models.
const MAX_EDGE_PX: u32 = 1568;

/// What `witan xlsx render` produced.
#[derive(Debug, Clone, Serialize)]
pub struct Rendered {
    path: PathBuf,
    range: String,
    dpr: u8,
    content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

impl Rendered {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Implementation of `witan xlsx render`.
pub async fn render(config: Config, args: RenderArgs) -> Result<Out<Rendered>> {
    let backend = Backend::connect(&config).await?;
    run(&backend, &args).await
}

/// Picks a device pixel ratio from the range size: 2 unless that would exceed the size vision
/// models handle well. Unparseable ranges get 2.
pub fn auto_dpr(range: &str) -> u8 {
    let Ok(range) = range.parse::<CellRange>() else {
        return 2;
    };
    let (width, height) = estimate_pixels(&range, 1);
    if width.saturating_mul(2) > MAX_EDGE_PX || height.saturating_mul(2) > MAX_EDGE_PX {
        1
    } else {
        2
    }
}

fn estimate_pixels(range: &CellRange, dpr: u8) -> (u32, u32) {
    let dpr = u32::from(dpr);
    (
        range.cols().saturating_mul(CELL_WIDTH_PX).saturating_mul(dpr),
        range.rows().saturating_mul(CELL_HEIGHT_PX).saturating_mul(dpr),
    )
}

pub(crate) async fn run(backend: &Backend, args: &RenderArgs) -> Result<Out<Rendered>> {
    let dpr = args.dpr().unwrap_or_else(|| auto_dpr(args.range()));
    if !(1..=3).contains(&dpr) {
        bail!("--dpr must be 1-3, got {dpr}");
    }
    let query = [
        ("address", args.range().to_string()),
        ("dpr", dpr.to_string()),
        ("format", args.format().to_string()),
    ];
    let query = query.as_slice();

    let image = match backend {
        Backend::Stateless(client) => client.render(args.file(), query).await?,
        Backend::Files(sync) => {
            let (_, image) = sync
                .with_remote_file(args.file(), |remote: RemoteFile| async move {
                    sync.client().files_render(&remote, query).await
                })
                .await?;
            image
        }
    };

    let path = save_image(&image, args.output()).await?;

    let parsed = args.range().parse::<CellRange>().ok();
    let (range, size) = match &parsed {
        Some(range) => (range.to_string(), Some(estimate_pixels(range, dpr))),
        None => (args.range().to_string(), None),
    };
    let message = match size {
        Some((width, height)) => {
            if width > MAX_EDGE_PX || height > MAX_EDGE_PX {
                warn!(
                    "Image exceeds {MAX_EDGE_PX}px. Vision models may downscale, reducing detail. \
                     Consider a smaller --range."
                );
            }
            format!("{}\n{range} | ~{width}x{height}px | dpr={dpr}", path.display())
        }
        None => format!("{}\n{range} | dpr={dpr}", path.display()),
    };

    let rendered = Rendered {
        path,
        range,
        dpr,
        content_type: image.content_type,
        width: size.map(|(w, _)| w),
        height: size.map(|(_, h)| h),
    };
    Ok(Out::new(message, rendered))
}

/// Writes the image to `output`, or to a new temporary file that outlives this process.
async fn save_image(image: &RenderedImage, output: Option<&Path>) -> Result<PathBuf> {
    let path = match output {
        Some(output) => {
            if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Unable to create directory {}", dir.display()))?;
            }
            output.to_path_buf()
        }
        None => {
            let suffix = if image.content_type.contains("webp") {
                ".webp"
            } else {
                ".png"
            };
            let file = tempfile::Builder::new()
                .prefix("witan-render-")
                .suffix(suffix)
                .tempfile()
                .context("creating temp file")?;
            let (_, path) = file.keep().context("creating temp file")?;
            path
        }
    };
    utils::write(&path, &image.bytes)
        .await
        .context("writing output")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_transport::{FakeFileServer, Scripted, ScriptedTransport};
    use crate::commands::test::{files_backend, stateless_backend, workbook};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_auto_dpr() {
        assert_eq!(auto_dpr("Sheet1!A1:J20"), 2);
        // 13 columns * 64 * 2 = 1664
        assert_eq!(auto_dpr("Sheet1!A1:M10"), 1);
        // 53 rows * 15 * 2 = 1590
        assert_eq!(auto_dpr("Sheet1!A1:A53"), 1);
        assert_eq!(auto_dpr("not a range"), 2);
    }

    #[test]
    fn test_auto_dpr_huge_ranges() {
        assert_eq!(auto_dpr("Sheet1!A1:A300000000"), 1);
        assert_eq!(auto_dpr("Sheet1!A1:ZZZZZZ1"), 1);
        assert_eq!(auto_dpr("Sheet1!A1:ZZZZZZ4294967295"), 1);
    }

    #[tokio::test]
    async fn test_render_to_output_path() {
        let dir = TempDir::new().unwrap();
        let path = workbook(&dir, "book.xlsx");
        let output = dir.path().join("out").join("range.png");
        let server = Arc::new(FakeFileServer::new());
        server.override_route("GET", "/v0/files/f1/xlsx/render", 200, "PNGDATA");
        let backend = files_backend(server.clone());

        let args = RenderArgs::new(&path, "'My Sheet'!B2:C3").with_output(&output);
        let out = run(&backend, &args).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"PNGDATA");
        assert_eq!(
            out.message(),
            format!("{}\nMy Sheet!B2:C3 | ~256x60px | dpr=2", output.display())
        );
        assert_eq!(
            server.requests()[1].query.as_deref(),
            Some("revision=r1&address=%27My+Sheet%27%21B2%3AC3&dpr=2&format=png")
        );
    }

    #[tokio::test]
    async fn test_render_to_temp_file_uses_content_type() {
        let dir = TempDir::new().unwrap();
        let path = workbook(&dir, "book.xlsx");
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::status(200)
            .with_header("content-type", "image/webp")]));
        let backend = stateless_backend(transport.clone());

        let out = run(&backend, &RenderArgs::new(&path, "Sheet1!A1").with_dpr(3))
            .await
            .unwrap();

        let rendered = out.structure().unwrap();
        let name = utils::file_name(rendered.path());
        assert!(name.starts_with("witan-render-"));
        assert!(name.ends_with(".webp"));
        assert!(rendered.path().exists());
        assert!(out.message().ends_with("Sheet1!A1 | ~192x45px | dpr=3"));
        assert_eq!(transport.requests()[0].line(), "POST /v0/xlsx/render");
        std::fs::remove_file(rendered.path()).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_dpr() {
        let dir = TempDir::new().unwrap();
        let path = workbook(&dir, "book.xlsx");
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::status(200)]));
        let backend = stateless_backend(transport.clone());

        let err = run(&backend, &RenderArgs::new(&path, "Sheet1!A1").with_dpr(4))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "--dpr must be 1-3, got 4");
        assert_eq!(transport.request_count(), 0);
    }
}
