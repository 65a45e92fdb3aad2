use crate::config::DatabaseConfig;
use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};

const IMAGE: &str = "postgres";
const DEFAULT_TAG: &str = "16";
const PORT: u16 = 5432;

/// Disposable PostgreSQL server holding a single empty database.
///
/// The entrypoint boots a temporary server for its init scripts, which logs
/// readiness on stdout, then restarts for real and logs on stderr. Both lines
/// must appear before the server is usable.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    config: DatabaseConfig,
}

impl PostgresServer {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let tag = config.tag.as_deref().unwrap_or(DEFAULT_TAG);
        let container = GenericImage::new(IMAGE, tag)
            .with_exposed_port(PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout(
                "database system is ready to accept connections",
            ))
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .start()
            .await?;

        Ok(Self { container, config })
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(PORT).await?)
    }

    /// `postgres://` URL for the test database.
    pub async fn database_url(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        let DatabaseConfig {
            database,
            username,
            password,
            ..
        } = &self.config;
        Ok(format!(
            "postgres://{username}:{password}@{host}:{port}/{database}"
        ))
    }

    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
