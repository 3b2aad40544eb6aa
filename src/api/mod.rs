//! Everything that talks to the Witan API: the transport seam, the retrying executor, the typed
//! client and its wire types.

mod client;
mod retry;
#[cfg(test)]
pub(crate) mod test_transport;
mod transport;
mod types;

pub use client::{content_type_for, read_content_type_for, Client, Query};
pub use retry::RetryPolicy;
pub use types::{
    CalcResponse, CellError, EditCell, EditResponse, ExecError, ExecRequest, ExecResponse,
    FileResponse, LintDiagnostic, LintResponse, OutlineEntry, OutlineMetadata, ReadMetadata,
    ReadOutlineResponse, ReadResponse, RemoteFile, RenderedImage, TouchedCell,
};

pub(crate) use retry::RequestExecutor;
pub(crate) use types::TokenResponse;

#[cfg(test)]
pub(crate) use transport::Transport;
