mod applink;
mod config;
mod error;
mod reporter;
mod transport;
mod upload;

pub use applink::{APPLINK_DATA_PARAMETER, parse_applink, parse_url};
pub use config::{DEFAULT_GRAPH_BASE_URL, ReporterConfig};
pub use error::{ReporterError, TransportError};
pub use reporter::{RecordOutcome, RefreshCompletion, Reporter, ReporterPhase};
pub use transport::{GraphRequest, GraphTransport, HttpMethod, HttpTransport};
pub use upload::{DELAY_FLOW, conversions_payload};
