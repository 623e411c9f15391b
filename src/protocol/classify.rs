//! Reply classification.
//!
//! Maps the gateway's `ret` status list onto the four outcomes the schedulers
//! act on. Rules are evaluated in a fixed precedence order (success, blocked,
//! not-found) and only the structured status entries are inspected, so marker
//! words appearing in titles or other payload fields never influence the
//! result.

use crate::protocol::types::RawResponse;

/// Outcome category of a gateway reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Success,
    Blocked,
    NotFound,
    Error,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::Blocked => "blocked",
            Classification::NotFound => "not_found",
            Classification::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// Entry code (text before the first `::`) equals the marker.
    Code,
    /// Marker appears anywhere inside the entry.
    Contains,
}

#[derive(Debug)]
struct StatusRule {
    classification: Classification,
    matcher: Matcher,
    markers: &'static [&'static str],
}

impl StatusRule {
    fn matches(&self, entry: &str) -> bool {
        match self.matcher {
            Matcher::Code => {
                let code = entry.split("::").next().unwrap_or(entry).trim();
                self.markers.iter().any(|marker| code == *marker)
            }
            Matcher::Contains => self.markers.iter().any(|marker| entry.contains(marker)),
        }
    }
}

/// Precedence-ordered rules; the first rule matching any entry wins.
static RULES: &[StatusRule] = &[
    StatusRule {
        classification: Classification::Success,
        matcher: Matcher::Code,
        markers: &["SUCCESS"],
    },
    StatusRule {
        classification: Classification::Blocked,
        matcher: Matcher::Contains,
        markers: &["RGV587_ERROR", "mini_login"],
    },
    StatusRule {
        classification: Classification::NotFound,
        matcher: Matcher::Contains,
        markers: &["NOT_FOUND", "DEL"],
    },
];

/// Classifies a list of `ret` entries such as `"SUCCESS::调用成功"`.
pub fn classify_ret<S: AsRef<str>>(ret: &[S]) -> Classification {
    RULES
        .iter()
        .find(|rule| ret.iter().any(|entry| rule.matches(entry.as_ref())))
        .map(|rule| rule.classification)
        .unwrap_or(Classification::Error)
}

/// Classifies a decoded reply. A reply without a `ret` list is an error.
pub fn classify(response: &RawResponse) -> Classification {
    classify_ret(response.ret().as_slice())
}
