use typed_builder::TypedBuilder;

/// Credentials and image tag shared by the database fixtures.
///
/// `tag` falls back to the fixture's default image tag when unset.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DatabaseConfig {
    #[builder(default = "raindrop".to_string(), setter(into))]
    pub database: String,
    #[builder(default = "raindrop".to_string(), setter(into))]
    pub username: String,
    #[builder(default = "raindrop".to_string(), setter(into))]
    pub password: String,
    #[builder(default, setter(strip_option, into))]
    pub tag: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
