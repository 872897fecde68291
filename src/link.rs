//! Resolves the single contextual hyperlink an article should carry.
use crate::model::{LinkSpec, Site};

/// Per-request link flags, as submitted by a front end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    pub enabled: bool,
    pub is_internal: bool,
    pub external_url: Option<String>,
    pub internal_path: Option<String>,
    pub anchor_keyword: Option<String>,
}

/// Compute the link for one (topic, site) pair.
///
/// Internal links are `site.url + internal_path`, or the bare site URL when no
/// path is given. External links use the money-site URL verbatim. Returns
/// `None` when linking is disabled or there is nothing to link to.
pub fn resolve(config: &LinkConfig, site: Option<&Site>) -> Option<LinkSpec> {
    if !config.enabled {
        return None;
    }

    let url = if config.is_internal {
        let site = site?;
        match config.internal_path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => format!("{}{}", site.url, path),
            None => site.url.clone(),
        }
    } else {
        config
            .external_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())?
            .to_string()
    };

    Some(LinkSpec {
        url,
        is_internal: config.is_internal,
        anchor_keyword: config
            .anchor_keyword
            .clone()
            .filter(|k| !k.trim().is_empty()),
    })
}
