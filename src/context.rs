use crate::authz::Authorizer;
use crate::gateway::proxy::Proxy;

/// State shared by every request served by the gateway.
pub struct GatewayContext {
    pub authz: Authorizer,
    pub proxy: Proxy,

    /// Path prefix stripped before the access decision, without a trailing
    /// slash.
    pub prefix: String,
}
