/*!
Runs `recur` as a child process and renders what it did as a snapshot.

Every `recur` command reads a recurrence from a file or stdin, so most tests
feed text into stdin and snapshot what comes out. Commands can also be chained
the way a shell does it, for example, `recur fmt | recur seq`, where the stdout
of one command becomes the stdin of the next.

A `Command` is an owned value (unlike `std::process::Command`), so a test can
build one in a single expression and hand it straight to
`assert_cmd_snapshot!`.
*/

use std::{
    collections::BTreeMap,
    env::consts::EXE_SUFFIX,
    ffi::{OsStr, OsString},
    io::{self, Write},
    path::{Path, PathBuf},
    process, thread,
};

use bstr::{ByteSlice, ByteVec};

macro_rules! assert_cmd_snapshot {
    ($cmd:expr, @$snapshot:literal $(,)?) => {{
        let snap = $cmd.snapshot();
        let mut settings = insta::Settings::clone_current();
        settings.set_info(snap.info());
        settings.set_omit_expression(true);
        settings.bind(|| {
            insta::assert_snapshot!(snap.snapshot(), @$snapshot);
        });
    }};
}

pub(crate) use assert_cmd_snapshot;

/// The rendered outcome of running a command or pipeline.
///
/// The exit status and both output streams are in the snapshot text. The
/// invocation itself is attached as insta "info", which shows up when
/// reviewing a failed snapshot but isn't compared.
pub struct Snapshot {
    info: CommandInfo,
    snapshot: String,
}

impl Snapshot {
    fn new(cmd: &Command, output: &process::Output) -> Snapshot {
        let snapshot = format!(
            "success: {:?}\n\
             exit_code: {}\n\
             ----- stdout -----\n\
             {}\n\
             ----- stderr -----\n\
             {}",
            output.status.success(),
            output.status.code().unwrap_or(!0),
            bytes_to_string(&output.stdout),
            bytes_to_string(&output.stderr),
        );
        Snapshot { info: CommandInfo::new(&cmd.std()), snapshot }
    }

    pub fn info(&self) -> &CommandInfo {
        &self.info
    }

    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }
}

/// One or more commands, each reading the stdout of the one before it.
///
/// Only the last command is snapshotted. Every earlier command must succeed,
/// otherwise the snapshot panics with that command's stderr.
#[derive(Debug)]
pub struct Pipeline {
    /// Written to the stdin of the first command, if present. Otherwise the
    /// first command gets an empty stdin.
    stdin: Option<Vec<u8>>,
    commands: Vec<Command>,
}

impl Pipeline {
    /// Appends a command that reads the stdout of the current last command.
    pub fn pipe(mut self, cmd: Command) -> Pipeline {
        self.commands.push(cmd);
        self
    }

    /// Runs every command in this pipeline and snapshots the last one.
    pub fn snapshot(&self) -> Snapshot {
        let mut feeder = None;
        let mut upstream: Option<process::ChildStdout> = None;
        let mut running = vec![];
        for (i, cmd) in self.commands.iter().enumerate() {
            let mut std = cmd.std();
            let stdin = match upstream.take() {
                Some(stdout) => process::Stdio::from(stdout),
                None if self.stdin.is_some() => process::Stdio::piped(),
                None => process::Stdio::null(),
            };
            std.stdin(stdin)
                .stdout(process::Stdio::piped())
                .stderr(process::Stdio::piped());
            let mut child = std.spawn().unwrap();
            if let (0, Some(bytes)) = (i, self.stdin.clone()) {
                let mut pipe = child.stdin.take().unwrap();
                feeder = Some(thread::spawn(move || pipe.write_all(&bytes)));
            }
            if i + 1 < self.commands.len() {
                upstream = child.stdout.take();
            }
            // Each child is waited on in its own thread. A pipe that nobody
            // drains can otherwise stall the whole chain.
            let wait = thread::spawn(move || child.wait_with_output());
            running.push((format!("{std:?}"), wait));
        }

        let (_, last) = running.pop().unwrap();
        let output = last.join().unwrap().unwrap();
        let last = self.commands.last().unwrap();
        let mut snap = Snapshot::new(last, &output);
        for (name, prior) in running {
            let output = prior.join().unwrap().unwrap();
            assert!(
                output.status.success(),
                "command `{name}` failed with exit code {exit},\n\
                 ----- stderr -----\n\
                 {stderr}",
                exit = output.status.code().unwrap_or(!0),
                stderr = bytes_to_string(&output.stderr),
            );
        }
        if let Some(feeder) = feeder {
            // A command that fails before reading its input closes the pipe
            // early. That shows up in the snapshot, not here.
            match feeder.join().unwrap() {
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
                    panic!("failed to write stdin: {err}")
                }
                _ => {}
            }
            snap.info.stdin = self.stdin.as_deref().map(bytes_to_string);
        }
        snap
    }
}

/// An owned builder for a `std::process::Command`.
///
/// Output is always captured by the snapshot machinery, so only arguments,
/// the environment and the working directory are configurable. Giving a
/// command stdin or piping it somewhere turns it into a `Pipeline`.
#[derive(Clone, Debug)]
pub struct Command {
    bin: OsString,
    current_dir: Option<PathBuf>,
    args: Vec<OsString>,
    envs: Vec<EnvAction>,
}

impl Command {
    pub fn new(bin: impl AsRef<OsStr>) -> Command {
        Command {
            bin: bin.as_ref().to_os_string(),
            current_dir: None,
            args: vec![],
            envs: vec![],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Command {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args(
        self,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Command {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    pub fn env(
        mut self,
        key: impl AsRef<OsStr>,
        val: impl AsRef<OsStr>,
    ) -> Command {
        self.envs.push(EnvAction::Set(
            key.as_ref().to_os_string(),
            val.as_ref().to_os_string(),
        ));
        self
    }

    /// Unsets an environment variable, even one inherited from the test
    /// process.
    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Command {
        self.envs.push(EnvAction::Remove(key.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Command {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Returns a pipeline that writes the given bytes to this command's
    /// stdin.
    pub fn stdin(self, stdin: impl Into<Vec<u8>>) -> Pipeline {
        Pipeline { stdin: Some(stdin.into()), commands: vec![self] }
    }

    /// Returns a pipeline where the given command reads this command's
    /// stdout.
    pub fn pipe(self, cmd: Command) -> Pipeline {
        Pipeline { stdin: None, commands: vec![self, cmd] }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut cmd = self.std();
        let output = cmd.stdin(process::Stdio::null()).output().unwrap();
        Snapshot::new(self, &output)
    }

    fn std(&self) -> process::Command {
        let mut cmd = process::Command::new(&self.bin);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.args(&self.args);
        for action in self.envs.iter() {
            match *action {
                EnvAction::Set(ref key, ref val) => cmd.env(key, val),
                EnvAction::Remove(ref key) => cmd.env_remove(key),
            };
        }
        cmd
    }
}

#[derive(Clone, Debug)]
enum EnvAction {
    Set(OsString, OsString),
    Remove(OsString),
}

/// The invocation behind a snapshot, as shown by `cargo insta review`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CommandInfo {
    bin: String,
    args: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<String>,
}

impl CommandInfo {
    fn new(cmd: &process::Command) -> CommandInfo {
        let program = Path::new(cmd.get_program());
        let bin = program.file_stem().unwrap_or(program.as_os_str());
        let env = cmd
            .get_envs()
            .map(|(key, val)| {
                let val = val.unwrap_or_default();
                (os_str_to_string(key), os_str_to_string(val))
            })
            .collect();
        CommandInfo {
            bin: os_str_to_string(bin),
            args: cmd.get_args().map(os_str_to_string).collect(),
            env,
            stdin: None,
        }
    }
}

/// Returns a command for the binary with the given name from the same
/// Cargo target directory as the running test executable.
pub fn bin(name: &str) -> Command {
    let exe = std::env::current_exe().unwrap();
    // The test executable lives in `target/<profile>/deps`.
    let profile_dir = exe
        .parent()
        .and_then(Path::parent)
        .expect("test executable should be in a profile directory");
    Command::new(profile_dir.join(format!("{name}{EXE_SUFFIX}")))
}

/// Returns the bytes as a string, escaping them when they aren't valid UTF-8.
fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(string) => string.to_string(),
        Err(_) => bytes.escape_bytes().to_string(),
    }
}

fn os_str_to_string(os_str: &OsStr) -> String {
    bytes_to_string(&Vec::from_os_str_lossy(os_str))
}
