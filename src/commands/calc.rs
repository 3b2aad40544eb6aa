use crate::api::{CalcResponse, CellError, RemoteFile};
use crate::args::CalcArgs;
use crate::commands::{
    plural, write_back_encoded, write_back_revision, Backend, Out, EXIT_FINDINGS,
};
use crate::{fixext, Config, Result};
use std::fmt::Write;
use tracing::debug;

/// Implementation of `witan xlsx calc`.
///
/// Recalculates the workbook, writes the recalculated copy over the local file (unless
/// `--verify`) and reports touched cells, changes and formula errors.
pub async fn calc(config: Config, args: CalcArgs) -> Result<Out<CalcResponse>> {
    let backend = Backend::connect(&config).await?;
    run(&backend, &args).await
}

pub(crate) async fn run(backend: &Backend, args: &CalcArgs) -> Result<Out<CalcResponse>> {
    let path = fixext::fix_excel_extension(args.file())?;
    let query: Vec<(&'static str, String)> = args
        .ranges()
        .iter()
        .map(|range| ("address", range.clone()))
        .collect();
    let query = query.as_slice();

    let mut response = match backend {
        Backend::Stateless(client) => {
            let mut response = client.calc(&path, query).await?;
            let file = response.file.take();
            if let (Some(encoded), false) = (file, args.verify()) {
                write_back_encoded(&path, &encoded).await?;
            }
            response
        }
        Backend::Files(sync) => {
            let (remote, response) = sync
                .with_remote_file(&path, |remote: RemoteFile| async move {
                    sync.client().files_calc(&remote, query).await
                })
                .await?;
            match response.revision_id.as_deref() {
                Some(revision_id) if !args.verify() => {
                    debug!("Calculation produced revision {revision_id}");
                    write_back_revision(sync, &path, remote.file_id(), revision_id).await?;
                }
                _ => {}
            }
            response
        }
    };
    response.file = None;

    let findings = !response.errors.is_empty() || (args.verify() && !response.changed.is_empty());
    let message = summarize(&response, args.show_touched(), args.verify());
    let out = Out::new(message, response);
    Ok(if findings {
        out.with_exit_code(EXIT_FINDINGS)
    } else {
        out
    })
}

fn summarize(response: &CalcResponse, show_touched: bool, verify: bool) -> String {
    let touched = response.touched.len();
    let changed = response.changed.len();
    let mut text = String::new();

    if show_touched {
        for (address, cell) in &response.touched {
            let formula = cell.formula.as_deref().unwrap_or_default();
            let shown = match response.errors.iter().find(|e| &e.address == address) {
                Some(error) => format!("{}{}", error.code, detail(error)),
                None => cell.value.clone(),
            };
            let _ = writeln!(text, "{address:<20} {formula:<30} {shown}");
        }
        let _ = write!(text, "\n{touched} cells recalculated, {changed} changed");
        if !response.errors.is_empty() {
            let _ = write!(text, ", {}", plural(response.errors.len(), "error"));
        }
    } else if response.errors.is_empty() {
        let _ = write!(
            text,
            "{touched} cells recalculated, 0 errors, {changed} changed"
        );
    } else {
        text.push_str(&error_list(&response.errors));
    }

    if verify {
        let mut addresses = response.changed.clone();
        addresses.sort();
        let _ = write!(text, "\n\nChanged ({changed}):");
        if addresses.is_empty() {
            text.push_str("\n  (none)");
        }
        for address in addresses {
            let _ = write!(text, "\n  {address}");
        }
    }
    text
}

/// `N error(s):` followed by one line per error, in the order given.
pub(crate) fn error_list(errors: &[CellError]) -> String {
    let mut text = format!("{}:", plural(errors.len(), "error"));
    for error in errors {
        let _ = write!(
            text,
            "\n  {:<20} {}  {}{}",
            error.address,
            error.formula.as_deref().unwrap_or_default(),
            error.code,
            detail(error)
        );
    }
    text
}

fn detail(error: &CellError) -> String {
    error
        .detail
        .as_deref()
        .map(|d| format!(" <- {d}"))
        .unwrap_or_default()
}
