//! Navigation state carried in the page query string.
//!
//! `view=admin` switches on editing controls. It is a display flag, not an access check.
//! `id=<report id>` selects a saved report.

use url::form_urlencoded;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub admin: bool,
    pub report_id: Option<String>,
}

impl ViewState {
    /// Reads `view` and `id` from a query string, with or without the leading `?`. Unknown
    /// parameters are ignored; the last occurrence of a repeated parameter wins.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut state = ViewState::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "view" => state.admin = value == "admin",
                "id" => {
                    let value = value.trim();
                    state.report_id = (!value.is_empty()).then(|| value.to_string());
                }
                _ => {}
            }
        }
        state
    }

    pub fn to_query(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if self.admin {
            serializer.append_pair("view", "admin");
        }
        if let Some(id) = &self.report_id {
            serializer.append_pair("id", id);
        }
        serializer.finish()
    }

    /// Public link to the selected report. Share links never carry the admin flag.
    pub fn share_url(&self, base: &str) -> Option<String> {
        let id = self.report_id.as_ref()?;
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("id", id)
            .finish();
        Some(format!("{}/?{}", base.trim_end_matches('/'), query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let state = ViewState::from_query("?view=admin&id=4f1c");
        assert!(state.admin);
        assert_eq!(state.report_id.as_deref(), Some("4f1c"));

        let state = ViewState::from_query("view=public&utm=x");
        assert!(!state.admin);
        assert_eq!(state.report_id, None);

        assert_eq!(ViewState::from_query("id="), ViewState::default());
    }

    #[test]
    fn test_query_and_share_link() {
        let state = ViewState {
            admin: true,
            report_id: Some("abc".to_string()),
        };
        assert_eq!(state.to_query(), "view=admin&id=abc");
        assert_eq!(
            state.share_url("https://mpi.example.com/").as_deref(),
            Some("https://mpi.example.com/?id=abc")
        );
        assert_eq!(ViewState::default().share_url("https://x"), None);
    }
}
