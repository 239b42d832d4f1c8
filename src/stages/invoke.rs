//! Argument templating and the single call path from an adapter to the
//! process runner.

use std::ffi::{OsStr, OsString};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{StageError, StageId};
use crate::config::ToolConfig;
use crate::process::{ProcessOutput, ProcessRunner, ToolCommand};

/// Named values substituted into a tool's argument template.
///
/// An argument that is exactly `{name}` becomes the raw value, so paths
/// that are not valid UTF-8 survive untouched. A placeholder embedded in a
/// longer argument (`--out={output}`) is replaced textually. Unknown
/// placeholders are left as written.
#[derive(Debug, Default, Clone)]
pub(crate) struct Placeholders {
    values: Vec<(&'static str, OsString)>,
}

impl Placeholders {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, name: &'static str, value: impl AsRef<OsStr>) -> Self {
        self.values.push((name, value.as_ref().to_os_string()));
        self
    }

    fn lookup(&self, name: &str) -> Option<&OsString> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub(crate) fn expand(&self, template: &[String]) -> Vec<OsString> {
        template.iter().map(|arg| self.expand_one(arg)).collect()
    }

    fn expand_one(&self, arg: &str) -> OsString {
        if let Some(name) = arg.strip_prefix('{').and_then(|a| a.strip_suffix('}')) {
            if let Some(value) = self.lookup(name) {
                return value.clone();
            }
        }

        let mut out = arg.to_string();
        for (name, value) in &self.values {
            let token = format!("{{{name}}}");
            if out.contains(&token) {
                out = out.replace(&token, &value.to_string_lossy());
            }
        }
        OsString::from(out)
    }
}

/// Run `tool` with already-expanded `args`, classifying any failure for `stage`.
pub(crate) async fn run_tool(
    stage: StageId,
    runner: &dyn ProcessRunner,
    tool: &ToolConfig,
    args: Vec<OsString>,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, StageError> {
    let mut command = ToolCommand::new(&tool.program)
        .args(args)
        .timeout(tool.timeout());
    if let Some(dir) = &tool.current_dir {
        command = command.current_dir(dir);
    }

    log::info!("{stage}: running {}", command.display_name());
    let started = Instant::now();

    let output = runner.run(command, cancel).await.map_err(|e| {
        let err = StageError::from_process(stage, e);
        log::warn!("{stage}: {} after {:?}", err.kind, started.elapsed());
        err
    })?;

    log::info!("{stage}: finished in {:.1}s", started.elapsed().as_secs_f32());
    Ok(output)
}
