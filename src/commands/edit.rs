use crate::api::{EditCell, EditResponse, RemoteFile};
use crate::args::EditArgs;
use crate::commands::calc::error_list;
use crate::commands::{write_back_encoded, write_back_revision, Backend, Out, EXIT_FINDINGS};
use crate::{Config, Result};
use anyhow::{bail, Context};
use serde_json::{Number, Value};

/// Implementation of `witan xlsx edit`.
pub async fn edit(config: Config, args: EditArgs) -> Result<Out<EditResponse>> {
    let cells = edit_cells(&args)?;
    let backend = Backend::connect(&config).await?;
    run(&backend, &args, &cells).await
}

/// Parses one `ADDRESS=VALUE` argument.
///
/// The address ends at the first `=` after the sheet separator `!`, so sheet names may contain
/// `=`. What follows is a formula when it starts with `=` (the `=` is kept), otherwise a number,
/// `true`/`false`, `null` (clears the cell) or text. Without `=` the argument is a format-only edit,
/// which needs a `format`.
///
/// # Errors
/// - When the address is empty.
/// - When there is no value and no `format`.
pub fn parse_edit_cell(arg: &str, format: Option<&str>) -> Result<EditCell> {
    let format = format.map(str::to_string);
    let start = arg.find('!').unwrap_or(0);
    let Some(split) = arg[start..].find('=').map(|i| i + start) else {
        if format.is_none() {
            bail!("invalid edit {arg:?}: expected address=value (use --format for format-only edits)");
        }
        if arg.is_empty() {
            bail!("invalid edit {arg:?}: empty address");
        }
        return Ok(EditCell {
            address: arg.to_string(),
            value: None,
            formula: None,
            format,
        });
    };
    let (address, remainder) = (&arg[..split], &arg[split + 1..]);
    if address.is_empty() {
        bail!("invalid edit {arg:?}: empty address");
    }
    let address = address.to_string();

    if remainder.starts_with('=') {
        return Ok(EditCell {
            address,
            value: None,
            formula: Some(remainder.to_string()),
            format,
        });
    }
    Ok(EditCell {
        address,
        value: Some(infer_value(remainder)),
        formula: None,
        format,
    })
}

fn infer_value(raw: &str) -> Value {
    if let Ok(number) = serde_json::from_str::<Number>(raw) {
        return Value::Number(number);
    }
    if let Some(number) = raw
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
    {
        return Value::Number(number);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

/// The cells to send: the `--cells` JSON array, or one cell per positional edit.
fn edit_cells(args: &EditArgs) -> Result<Vec<EditCell>> {
    if let Some(json) = args.cells() {
        if args.format().is_some() {
            bail!("--cells and --format are mutually exclusive");
        }
        if !args.edits().is_empty() {
            bail!("positional edit args are not allowed with --cells");
        }
        let cells: Vec<EditCell> = serde_json::from_str(json).context("invalid --cells JSON")?;
        if cells.is_empty() {
            bail!("--cells array must not be empty");
        }
        return Ok(cells);
    }
    if args.edits().is_empty() {
        bail!("at least one edit argument is required");
    }
    args.edits()
        .iter()
        .map(|arg| parse_edit_cell(arg, args.format()))
        .collect()
}

pub(crate) async fn run(
    backend: &Backend,
    args: &EditArgs,
    cells: &[EditCell],
) -> Result<Out<EditResponse>> {
    let path = args.file();
    let mut response = match backend {
        Backend::Stateless(client) => {
            let mut response = client.edit(path, cells).await?;
            if let Some(encoded) = response.file.take() {
                write_back_encoded(path, &encoded).await?;
            }
            response
        }
        Backend::Files(sync) => {
            let (remote, response) = sync
                .with_remote_file(path, |remote: RemoteFile| async move {
                    sync.client().files_edit(&remote, cells).await
                })
                .await?;
            if let Some(revision_id) = response.revision_id.as_deref() {
                write_back_revision(sync, path, remote.file_id(), revision_id).await?;
            }
            response
        }
    };
    response.file = None;

    if response.errors.is_empty() {
        let message = format!(
            "Edit applied. {} cells recalculated, 0 errors.",
            response.touched.len()
        );
        return Ok(Out::new(message, response));
    }
    let mut errors = response.errors.clone();
    errors.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(Out::new(error_list(&errors), response).with_exit_code(EXIT_FINDINGS))
}
