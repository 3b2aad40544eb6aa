use crate::api::{LintDiagnostic, LintResponse, RemoteFile};
use crate::args::LintArgs;
use crate::commands::{plural, Backend, Out, EXIT_FINDINGS};
use crate::{fixext, Config, Result};
use std::fmt::Write;

const ERROR: &str = "Error";
const WARNING: &str = "Warning";

/// Implementation of `witan xlsx lint`.
pub async fn lint(config: Config, args: LintArgs) -> Result<Out<LintResponse>> {
    let backend = Backend::connect(&config).await?;
    run(&backend, &args).await
}

pub(crate) async fn run(backend: &Backend, args: &LintArgs) -> Result<Out<LintResponse>> {
    let path = fixext::fix_excel_extension(args.file())?;
    let query: Vec<(&'static str, String)> = args
        .ranges()
        .iter()
        .map(|r| ("range", r.clone()))
        .chain(args.skip_rules().iter().map(|r| ("skipRule", r.clone())))
        .chain(args.only_rules().iter().map(|r| ("onlyRule", r.clone())))
        .collect();
    let query = query.as_slice();

    let response = match backend {
        Backend::Stateless(client) => client.lint(&path, query).await?,
        Backend::Files(sync) => {
            let (_, response) = sync
                .with_remote_file(&path, |remote: RemoteFile| async move {
                    sync.client().files_lint(&remote, query).await
                })
                .await?;
            response
        }
    };

    let findings = response
        .diagnostics
        .iter()
        .any(|d| d.severity == ERROR || d.severity == WARNING);
    let out = Out::new(report(&response), response);
    Ok(if findings {
        out.with_exit_code(EXIT_FINDINGS)
    } else {
        out
    })
}

/// Diagnostics grouped by severity, followed by a one-line summary.
fn report(response: &LintResponse) -> String {
    let (errors, rest): (Vec<&LintDiagnostic>, Vec<&LintDiagnostic>) = response
        .diagnostics
        .iter()
        .partition(|d| d.severity == ERROR);
    let (warnings, infos): (Vec<&LintDiagnostic>, Vec<&LintDiagnostic>) =
        rest.into_iter().partition(|d| d.severity == WARNING);

    let mut text = String::new();
    for (severity, group) in [("Error", &errors), ("Warning", &warnings), ("Info", &infos)] {
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(text, "{severity} ({}):", group.len());
        for d in group {
            let _ = writeln!(
                text,
                "  {:<6} {:<20} {}",
                d.rule_id,
                d.location.as_deref().unwrap_or_default(),
                d.message
            );
        }
        text.push('\n');
    }
    let _ = write!(
        text,
        "{} ({}, {}, {} info)",
        plural(response.total, "issue"),
        plural(errors.len(), "error"),
        plural(warnings.len(), "warning"),
        infos.len()
    );
    text
}
