use guard_limit::endpoint_from_url;
use guard_limit::identity_from_forwarded;

/// Who is calling, and what they are calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    pub identity: String,
    pub endpoint: String,
    pub method: String,
}

impl CallerInfo {
    /// Build caller info from a forwarding-address token, a request url and a method.
    pub fn from_parts(forwarded: Option<&str>, url: &str, method: &str) -> Self {
        Self {
            identity: identity_from_forwarded(forwarded).to_string(),
            endpoint: endpoint_from_url(url).to_string(),
            method: method.to_string(),
        }
    }
}

/// Extracts [`CallerInfo`] from a request.
///
/// Implemented for any `Fn(&Req) -> CallerInfo`.
pub trait Identify<Req> {
    fn identify(&self, req: &Req) -> CallerInfo;
}

impl<F, Req> Identify<Req> for F
where
    F: Fn(&Req) -> CallerInfo,
{
    fn identify(&self, req: &Req) -> CallerInfo {
        self(req)
    }
}
