use crate::config::DatabaseConfig;
use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};

const IMAGE: &str = "mysql";
const DEFAULT_TAG: &str = "8.4";
const PORT: u16 = 3306;

/// Disposable MySQL server holding a single empty database.
pub struct MySqlServer {
    container: ContainerAsync<GenericImage>,
    config: DatabaseConfig,
}

impl MySqlServer {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let tag = config.tag.as_deref().unwrap_or(DEFAULT_TAG);
        let container = GenericImage::new(IMAGE, tag)
            .with_exposed_port(PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr("ready for connections"))
            .with_env_var("MYSQL_DATABASE", config.database.as_str())
            .with_env_var("MYSQL_USER", config.username.as_str())
            .with_env_var("MYSQL_PASSWORD", config.password.as_str())
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
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

    /// `mysql://` URL for the test database.
    pub async fn database_url(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        let DatabaseConfig {
            database,
            username,
            password,
            ..
        } = &self.config;
        Ok(format!("mysql://{username}:{password}@{host}:{port}/{database}"))
    }

    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
