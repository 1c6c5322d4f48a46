//! Server-side fault injection.
//!
//! A [`FailPoint`] wraps the raw `configureFailPoint` directive from a test
//! file (or built through [`FailPoint::fail_command`]). Enabling one yields
//! a [`FailPointGuard`]; the test context keeps every guard acquired during
//! a run and disables them all at teardown, in order, tolerating individual
//! failures so one broken guard cannot block cleanup of the rest.

use std::{sync::Arc, time::Duration};

use mongodb::{
    bson::{doc, Bson, Document},
    options::{ReadPreference, SelectionCriteria, ServerAddress},
    Client,
};
use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct FailPoint {
    #[serde(flatten)]
    command: Document,
}

impl FailPoint {
    /// The name of the directive, i.e. the value of `configureFailPoint`.
    pub fn name(&self) -> Result<&str> {
        self.command
            .get_str("configureFailPoint")
            .map_err(|_| Error::unsupported_argument("failPoint", "missing configureFailPoint"))
    }

    /// Builds a `failCommand` fail point.
    /// See <https://github.com/mongodb/mongo/wiki/The-%22failCommand%22-fail-point>.
    pub fn fail_command(
        fail_commands: &[&str],
        mode: FailPointMode,
        options: impl Into<Option<FailCommandOptions>>,
    ) -> FailPoint {
        let mut data = doc! {
            "failCommands": fail_commands.iter().map(|s| s.to_string()).collect::<Vec<String>>(),
        };
        if let Some(options) = options.into() {
            options.append_to(&mut data);
        }

        let command = doc! {
            "configureFailPoint": "failCommand",
            "mode": mode.to_bson(),
            "data": data,
        };
        FailPoint { command }
    }

    /// Issues the directive against the server selected by `criteria`
    /// (primary by default) and returns a guard that disables it.
    pub async fn enable(
        &self,
        client: &Client,
        criteria: impl Into<Option<SelectionCriteria>>,
    ) -> Result<FailPointGuard> {
        let name = self.name()?.to_string();
        let criteria = criteria
            .into()
            .unwrap_or_else(|| SelectionCriteria::ReadPreference(ReadPreference::Primary));
        client
            .database("admin")
            .run_command(self.command.clone(), criteria.clone())
            .await?;
        Ok(FailPointGuard {
            client: client.clone(),
            name,
            criteria,
            released: false,
        })
    }
}

/// Selection criteria pinning a command to one specific server, used by the
/// targeted fail point operation to hit the mongos a session is pinned to.
pub(crate) fn single_server_criteria(address: ServerAddress) -> SelectionCriteria {
    SelectionCriteria::Predicate(Arc::new(move |server_info| {
        *server_info.address() == address
    }))
}

/// An enabled fail point, recorded with everything needed to disable it on
/// the same server it was set on.
pub struct FailPointGuard {
    client: Client,
    name: String,
    criteria: SelectionCriteria,
    released: bool,
}

impl FailPointGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Disables the directive. At most one disable command is ever issued
    /// per guard; repeated calls are no-ops.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.client
            .database("admin")
            .run_command(
                doc! { "configureFailPoint": self.name.clone(), "mode": "off" },
                self.criteria.clone(),
            )
            .await?;
        Ok(())
    }
}

impl Drop for FailPointGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(fail_point = %self.name, "fail point guard dropped without release");
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[allow(unused)]
pub enum FailPointMode {
    AlwaysOn,
    Times(i32),
    Off,
    ActivationProbability(f32),
}

impl FailPointMode {
    fn to_bson(self) -> Bson {
        match self {
            FailPointMode::AlwaysOn => Bson::String("alwaysOn".to_string()),
            FailPointMode::Times(n) => Bson::Document(doc! { "times": n }),
            FailPointMode::Off => Bson::String("off".to_string()),
            FailPointMode::ActivationProbability(p) => {
                Bson::Document(doc! { "activationProbability": p })
            }
        }
    }
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct FailCommandOptions {
    /// If set, how long the server should block the affected commands.
    /// Only available on 4.2.9+.
    #[builder(default)]
    block_connection: Option<Duration>,

    /// Whether the server should hang up when the client sends an affected
    /// command.
    #[builder(default)]
    close_connection: Option<bool>,

    /// The error code to include in the server's reply to an affected
    /// command.
    #[builder(default)]
    error_code: Option<i64>,

    /// Error labels to attach to the server's reply. An empty array
    /// suppresses all labels the server would otherwise attach; the field's
    /// presence completely overrides the server's labeling behavior.
    /// Only available on 4.4+.
    #[builder(default)]
    error_labels: Option<Vec<String>>,

    /// Document to be returned as a write concern error.
    #[builder(default)]
    write_concern_error: Option<Document>,
}

impl FailCommandOptions {
    fn append_to(&self, data: &mut Document) {
        if let Some(duration) = self.block_connection {
            data.insert("blockConnection", true);
            data.insert("blockTimeMS", duration.as_millis() as i64);
        }
        if let Some(close) = self.close_connection {
            data.insert("closeConnection", close);
        }
        if let Some(code) = self.error_code {
            data.insert("errorCode", code);
        }
        if let Some(ref labels) = self.error_labels {
            data.insert("errorLabels", labels.clone());
        }
        if let Some(ref wce) = self.write_concern_error {
            data.insert("writeConcernError", wce.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_command_directive_shape() {
        let options = FailCommandOptions::builder()
            .error_code(Some(91))
            .block_connection(Some(Duration::from_millis(250)))
            .build();
        let fp = FailPoint::fail_command(&["insert", "find"], FailPointMode::Times(2), options);
        assert_eq!(fp.name().unwrap(), "failCommand");
        assert_eq!(
            fp.command.get_document("mode").unwrap(),
            &doc! { "times": 2 }
        );
        let data = fp.command.get_document("data").unwrap();
        assert_eq!(data.get_i64("errorCode").unwrap(), 91);
        assert_eq!(data.get_bool("blockConnection").unwrap(), true);
        assert_eq!(data.get_i64("blockTimeMS").unwrap(), 250);
    }

    #[test]
    fn directive_without_name_is_rejected() {
        let fp = FailPoint {
            command: doc! { "mode": "off" },
        };
        assert!(fp.name().is_err());
    }
}
