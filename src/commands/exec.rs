use crate::api::{ExecError, ExecRequest, ExecResponse, RemoteFile};
use crate::args::ExecArgs;
use crate::commands::{write_back_encoded, write_back_revision, Backend, Out};
use crate::{fixext, utils, Config, Result};
use anyhow::{bail, Context};
use base64::prelude::{Engine, BASE64_STANDARD};
use serde_json::Value;
use std::fmt::Write;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Exit code for a script that ran and failed.
const EXIT_SCRIPT_FAILED: u8 = 1;

/// Implementation of `witan xlsx exec`.
pub async fn exec(config: Config, args: ExecArgs) -> Result<Out<ExecResponse>> {
    let backend = Backend::connect(&config).await?;
    run(&backend, &args, tokio::io::stdin()).await
}

pub(crate) async fn run<R>(backend: &Backend, args: &ExecArgs, stdin: R) -> Result<Out<ExecResponse>>
where
    R: AsyncRead + Unpin,
{
    let path = fixext::fix_excel_extension(args.file())?;
    let code = resolve_code(args, stdin).await?;
    if code.trim().is_empty() {
        bail!("exec code must not be empty");
    }
    let input = match args.input_json() {
        Some(raw) => serde_json::from_str(raw).context("invalid --input-json")?,
        None => Value::Object(Default::default()),
    };
    let request = ExecRequest {
        code,
        input,
        timeout_ms: args.timeout_ms(),
        max_output_chars: args.max_output_chars(),
    };
    let save = args.save();

    let mut response = match backend {
        Backend::Stateless(client) => {
            let mut response = client.exec(&path, &request, save).await?;
            let file = response.file.take();
            if let (Some(encoded), true) = (file, save && response.ok) {
                write_back_encoded(&path, &encoded).await?;
            }
            response
        }
        Backend::Files(sync) => {
            let request = &request;
            let (remote, response) = sync
                .with_remote_file(&path, |remote: RemoteFile| async move {
                    sync.client().files_exec(&remote, request, save).await
                })
                .await?;
            if let (Some(revision_id), true) = (response.revision_id.as_deref(), save && response.ok)
            {
                write_back_revision(sync, &path, remote.file_id(), revision_id).await?;
            }
            response
        }
    };
    response.file = None;

    let mut text = response.stdout.clone();
    if response.ok {
        if !response.result.is_null() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            let pretty = serde_json::to_string_pretty(&response.result)
                .context("Unable to format the exec result")?;
            text.push_str(&pretty);
        }
    } else {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format_exec_error(response.error.as_ref()));
    }
    for image in save_images(&response.images).await? {
        let _ = write!(text, "\n{}", image.display());
    }

    let ok = response.ok;
    let out = Out::new(text.trim_start_matches('\n'), response);
    Ok(if ok {
        out
    } else {
        out.with_exit_code(EXIT_SCRIPT_FAILED)
    })
}

async fn resolve_code<R>(args: &ExecArgs, mut stdin: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    if let Some(expr) = args.expr() {
        let expr = expr.trim();
        if expr.is_empty() {
            bail!("--expr must not be empty");
        }
        if expr.contains(&[';', '\n', '\r'][..]) {
            bail!("--expr is for single expressions; use --code for multi-statement scripts");
        }
        return Ok(format!("return ({expr});"));
    }
    if let Some(code) = args.code() {
        return Ok(code.to_string());
    }
    if let Some(script) = args.script() {
        return utils::read_to_string(script)
            .await
            .context("reading script file");
    }
    if args.stdin() {
        let mut code = String::new();
        stdin
            .read_to_string(&mut code)
            .await
            .context("reading --stdin")?;
        return Ok(code);
    }
    bail!("exactly one of --code, --script, --stdin, or --expr is required")
}

fn format_exec_error(error: Option<&ExecError>) -> String {
    let Some(error) = error else {
        return "execution failed".to_string();
    };
    match (error.kind.as_str(), error.code.as_str(), error.message.as_str()) {
        (kind, code, message) if !kind.is_empty() && !code.is_empty() => {
            format!("{kind} ({code}): {message}")
        }
        (_, code, message) if !code.is_empty() => format!("{code}: {message}"),
        (_, _, message) if !message.is_empty() => message.to_string(),
        _ => "execution failed".to_string(),
    }
}

/// File extension for a `data:image/...;base64,` URL. PNG unless it says otherwise.
fn image_extension(data_url: &str) -> &'static str {
    let Some((prefix, _)) = data_url.split_once(',') else {
        return ".png";
    };
    if prefix.contains("image/webp") {
        ".webp"
    } else if prefix.contains("image/jpeg") {
        ".jpg"
    } else {
        ".png"
    }
}

/// Writes each returned image to its own temporary file, kept after exit.
async fn save_images(images: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(images.len());
    for image in images {
        let encoded = image.split_once(',').map_or(image.as_str(), |(_, data)| data);
        let bytes = BASE64_STANDARD
            .decode(encoded)
            .context("decoding exec image")?;
        let file = tempfile::Builder::new()
            .prefix("witan-exec-")
            .suffix(image_extension(image))
            .tempfile()
            .context("creating temp image file")?;
        let (_, path) = file.keep().context("creating temp image file")?;
        utils::write(&path, bytes)
            .await
            .context("writing exec image")?;
        paths.push(path);
    }
    Ok(paths)
}
