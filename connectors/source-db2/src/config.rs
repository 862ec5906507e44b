//! DB2 connection parameters.

use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 50000;

#[derive(Clone, Deserialize)]
pub struct Db2Config {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Db2Config {
    /// CLI/ODBC connection string for the IBM DB2 driver.
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!(
            "DATABASE={};HOSTNAME={};PORT={};PROTOCOL=TCPIP;UID={};PWD={};",
            self.database, self.host, self.port, self.user, self.password
        )
    }

    /// `host:port/database`, safe to log.
    #[must_use]
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl std::fmt::Debug for Db2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db2Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}
