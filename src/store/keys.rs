/// Builds namespaced session-store keys of the form `<prefix>:<category>:<id>`.
#[derive(Clone, Debug)]
pub struct SessionKeys {
    prefix: String,
}

impl SessionKeys {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn refresh_token(&self, token: &str) -> String {
        format!("{}:refresh_token:{token}", self.prefix)
    }

    #[must_use]
    pub fn session(&self, session_id: &str) -> String {
        format!("{}:session:{session_id}", self.prefix)
    }

    #[must_use]
    pub fn user_by_id(&self, id: &str) -> String {
        format!("{}:user:id:{id}", self.prefix)
    }

    #[must_use]
    pub fn user_by_email(&self, email: &str) -> String {
        format!("{}:user:email:{email}", self.prefix)
    }

    #[must_use]
    pub fn rate_limit(&self, identifier: &str) -> String {
        format!("{}:rate_limit:{identifier}", self.prefix)
    }

    /// `<prefix>:<part>:<part>...`
    #[must_use]
    pub fn custom<S: AsRef<str>>(&self, parts: &[S]) -> String {
        parts.iter().fold(self.prefix.clone(), |mut key, part| {
            key.push(':');
            key.push_str(part.as_ref());
            key
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = SessionKeys::new("custodia");
        assert_eq!(keys.refresh_token("abc"), "custodia:refresh_token:abc");
        assert_eq!(keys.session("s1"), "custodia:session:s1");
        assert_eq!(keys.user_by_id("42"), "custodia:user:id:42");
        assert_eq!(keys.user_by_email("a@b.io"), "custodia:user:email:a@b.io");
        assert_eq!(keys.rate_limit("1.2.3.4"), "custodia:rate_limit:1.2.3.4");
    }

    #[test]
    fn custom_joins_parts() {
        let keys = SessionKeys::new("app");
        assert_eq!(keys.custom(&["a", "b", "c"]), "app:a:b:c");
        assert_eq!(keys.custom::<&str>(&[]), "app");
    }

    #[test]
    fn prefixes_isolate_namespaces() {
        assert_ne!(
            SessionKeys::new("one").refresh_token("t"),
            SessionKeys::new("two").refresh_token("t")
        );
    }
}
