// -
// Coordination store layout

/// Pipeline (dataflow) document
pub(crate) const DATAFLOW_KEY: &str = "/gse/config/server/dataserver/dataflow";

/// One child per routing entity, named by its numeric id
pub(crate) const CHANNEL_BASE: &str = "/gse/config/server/dataserver/channelid";

/// One ephemeral child per live server
pub(crate) const DISCOVERY_BASE: &str = "/gse/v2/service/data";

/// Flat JSON object with load-score weights
pub(crate) const BALANCE_KEY: &str = "/gse/config/server/balance/data";

/// One child per ops service mapping
pub(crate) const OPS_SERVICE_BASE: &str = "/gse/v2/config/data/ops_config";

/// One child per storage cluster, named by its stream-to id
pub(crate) const STREAM_TO_BASE: &str = "/gse/config/server/dataserver/streamto";

/// Child node names under a routing entity
pub(crate) const METADATA_NODE: &str = "metadata";
pub(crate) const CHANNEL_NODE: &str = "channel";
pub(crate) const FILTER_NODE: &str = "filter";

/// `store.endpoints` value selecting the in-process ensemble
pub const IN_PROCESS_ENDPOINT: &str = "in-process";

// -
// Load-balance fallbacks

/// Cluster and zone consulted when the requested one has no servers
pub const DEFAULT_LOCATION: &str = "default";

pub(crate) const DEFAULT_SERVICE_PORT: u16 = 58625;

// -
// Log file

pub const LOG_FILE_NAME: &str = "routeplane.log";
