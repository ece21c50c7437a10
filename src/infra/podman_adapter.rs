use crate::domain::{ContainerRuntime, ContainerSpec, LogStream};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

/// Overrides the host reported for mapped ports.
pub const HOST_OVERRIDE_ENV: &str = "TESTCONTAINERS_HOST_OVERRIDE";
const DEFAULT_HOST: &str = "localhost";

/// [`ContainerRuntime`] driving the `podman` CLI.
#[derive(Debug, Clone)]
pub struct PodmanAdapter {
    binary: PathBuf,
}

impl PodmanAdapter {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("podman"),
        }
    }

    /// Uses another podman-compatible binary (e.g. `docker`).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn output<I, S>(&self, args: I, context: &str) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| context.to_string())
    }

    async fn run<I, S>(&self, args: I, context: &str) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(args, context).await?;
        ensure_success(&output, context)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Streams a tar archive into `podman cp - <id>:<dest_dir>`.
    async fn copy_archive(&self, id: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        let dest = format!("{id}:{dest_dir}");
        let context = format!("copying into {dest}");
        let mut child = Command::new(&self.binary)
            .args(["cp", "-", dest.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| context.clone())?;

        let mut stdin = child.stdin.take().context("podman cp stdin unavailable")?;
        stdin
            .write_all(&archive)
            .await
            .with_context(|| context.clone())?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .with_context(|| context.clone())?;
        ensure_success(&output, &context)
    }
}

impl Default for PodmanAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for PodmanAdapter {
    async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        let output = self
            .output(
                ["container", "inspect", "--format", "{{.Id}}", name],
                &format!("looking up container {name}"),
            )
            .await?;

        if !output.status.success() {
            return Ok(None);
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!id.is_empty()).then_some(id))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let args = create_args(spec);
        debug!("podman {}", args.join(" "));
        self.run(args, &format!("creating container {}", spec.display_name()))
            .await
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.run(["start", id], &format!("starting container {id}"))
            .await
            .map(drop)
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let seconds = grace.as_secs().to_string();
        self.run(
            ["stop", "--time", seconds.as_str(), id],
            &format!("stopping container {id}"),
        )
        .await
        .map(drop)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.run(
            ["rm", "--force", "--volumes", "--ignore", id],
            &format!("removing container {id}"),
        )
        .await
        .map(drop)
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let state = self
            .run(
                ["container", "inspect", "--format", "{{.State.Running}}", id],
                &format!("checking state of container {id}"),
            )
            .await?;
        Ok(state == "true")
    }

    async fn host(&self, _id: &str) -> Result<String> {
        Ok(std::env::var(HOST_OVERRIDE_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string()))
    }

    async fn mapped_port(&self, id: &str, port: &str) -> Result<Option<u16>> {
        let output = self
            .output(["port", id, port], &format!("reading port {port} of {id}"))
            .await?;

        if !output.status.success() {
            return Ok(None);
        }

        Ok(parse_port_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn logs(&self, id: &str) -> Result<String> {
        let context = format!("reading logs of {id}");
        let output = self.output(["logs", id], &context).await?;
        ensure_success(&output, &context)?;

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn follow_logs(&self, id: &str) -> Result<LogStream> {
        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("following logs of {id}"))?;

        let stdout = child.stdout.take().context("podman logs stdout unavailable")?;
        let stderr = child.stderr.take().context("podman logs stderr unavailable")?;

        // The child rides along with the stdout stream so dropping the
        // stream kills `podman logs`.
        let stdout = stream::unfold(
            (BufReader::new(stdout).lines(), child),
            |(mut lines, child)| async move {
                let line = lines.next_line().await.ok().flatten()?;
                Some((line, (lines, child)))
            },
        );

        Ok(stream::select(stdout, line_stream(stderr)).boxed())
    }

    async fn copy_file_to_container(
        &self,
        id: &str,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()> {
        let (dest_dir, file_name) = split_container_path(container_path)?;
        let content = tokio::fs::read(host_path)
            .await
            .with_context(|| format!("reading {host_path:?}"))?;
        let archive = file_archive(file_name, &content, mode)?;

        self.copy_archive(id, dest_dir, archive).await
    }

    async fn copy_dir_to_container(
        &self,
        id: &str,
        host_dir: &Path,
        container_parent: &str,
        mode: u32,
    ) -> Result<()> {
        let dir = host_dir.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || dir_archive(&dir, mode))
            .await
            .context("archiving task failed")??;

        self.copy_archive(id, container_parent, archive).await
    }
}

fn line_stream<R>(reader: R) -> BoxStream<'static, String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(BufReader::new(reader).lines(), |mut lines| async move {
        let line = lines.next_line().await.ok().flatten()?;
        Some((line, lines))
    })
    .boxed()
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into()];

    if let Some(name) = &spec.name {
        args.push("--name".into());
        args.push(name.clone());
    }

    for port in &spec.exposed_ports {
        args.push("-p".into());
        args.push(port.clone());
    }

    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    for mount in &spec.mounts {
        let mut volume = format!("{}:{}", mount.source.display(), mount.target);
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push("-v".into());
        args.push(volume);
    }

    args.push(spec.image.clone());
    args.extend(spec.cmd.iter().cloned());

    args
}

/// Parses `podman port` output such as `0.0.0.0:49153`.
fn parse_port_output(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

fn split_container_path(container_path: &str) -> Result<(&str, &str)> {
    match container_path.rsplit_once('/') {
        Some((_, "")) | None => bail!("{container_path:?} is not an absolute file path"),
        Some(("", file)) => Ok(("/", file)),
        Some((dir, file)) => Ok((dir, file)),
    }
}

fn file_archive(name: &str, content: &[u8], mode: u32) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append_file(&mut builder, Path::new(name), content, mode)?;
    Ok(builder.into_inner()?)
}

/// Archives regular files and directories under `dir`, rooted at its name.
/// Symbolic links are left out.
fn dir_archive(dir: &Path, mode: u32) -> Result<Vec<u8>> {
    let root = dir
        .file_name()
        .with_context(|| format!("{dir:?} has no directory name"))?;
    let mut builder = tar::Builder::new(Vec::new());

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {dir:?}"))?;
        let rel = entry.path().strip_prefix(dir)?;
        let archived = Path::new(root).join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &archived, std::io::empty())?;
        } else if file_type.is_file() {
            let content = std::fs::read(entry.path())
                .with_context(|| format!("reading {:?}", entry.path()))?;
            append_file(&mut builder, &archived, &content, mode)?;
        }
    }

    Ok(builder.into_inner()?)
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &Path,
    content: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(mode);
    header.set_size(content.len() as u64);
    builder.append_data(&mut header, path, content)?;
    Ok(())
}

fn ensure_success(output: &Output, context: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!(
        "podman returned status {:?} ({context}): {}",
        output.status,
        stderr.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContainerMount, DEFAULT_IMAGE};
    use std::collections::HashMap;
    use std::io::Read;

    fn read_archive(bytes: &[u8]) -> HashMap<String, (String, u32)> {
        let mut archive = tar::Archive::new(bytes);
        let mut entries = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mode = entry.header().mode().unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.insert(path, (content, mode));
        }
        entries
    }

    #[test]
    fn test_create_args() {
        let mut spec = ContainerSpec {
            name: Some("tnt".into()),
            cmd: vec!["sh".into(), "-c".into(), "tarantool_box".into()],
            ..ContainerSpec::default()
        };
        spec.env.insert("TT_PRELOAD".into(), "/opt/init.lua".into());
        spec.mounts.push(ContainerMount {
            source: PathBuf::from("/host/scripts"),
            target: "/opt/tarantool".into(),
            read_only: true,
        });

        assert_eq!(
            create_args(&spec),
            vec![
                "create",
                "--name",
                "tnt",
                "-p",
                "3301/tcp",
                "-e",
                "TT_PRELOAD=/opt/init.lua",
                "-v",
                "/host/scripts:/opt/tarantool:ro",
                DEFAULT_IMAGE,
                "sh",
                "-c",
                "tarantool_box",
            ]
        );
    }

    #[test]
    fn test_parse_port_output() {
        assert_eq!(parse_port_output("0.0.0.0:49153\n"), Some(49153));
        assert_eq!(parse_port_output("0.0.0.0:41000\n[::]:41000\n"), Some(41000));
        assert_eq!(parse_port_output(""), None);
        assert_eq!(parse_port_output("garbage"), None);
    }

    #[test]
    fn test_split_container_path() {
        assert_eq!(
            split_container_path("/etc/tarantool/tarantool.cfg").unwrap(),
            ("/etc/tarantool", "tarantool.cfg")
        );
        assert_eq!(split_container_path("/init.lua").unwrap(), ("/", "init.lua"));
        assert!(split_container_path("/etc/tarantool/").is_err());
        assert!(split_container_path("init.lua").is_err());
    }

    #[test]
    fn test_file_archive_keeps_mode() {
        let archive = file_archive("tarantool.cfg", b"primary_port = 3301", 0o755).unwrap();
        let entries = read_archive(&archive);

        assert_eq!(
            entries.get("tarantool.cfg"),
            Some(&("primary_port = 3301".to_string(), 0o755))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_file_reports_unreadable_host_file() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("absent.cfg");
        let adapter = PodmanAdapter::with_binary("/nonexistent/podman");

        let err = adapter
            .copy_file_to_container("tnt", &missing, "/etc/tarantool/tarantool.cfg", 0o755)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("reading"));
    }

    #[test]
    fn test_dir_archive_skips_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("testdata");
        std::fs::create_dir_all(root.join("lua")).unwrap();
        std::fs::write(root.join("real.cfg"), "cfg").unwrap();
        std::fs::write(root.join("lua/init.lua"), "box.cfg{}").unwrap();
        std::os::unix::fs::symlink(root.join("real.cfg"), root.join("link")).unwrap();

        let entries = read_archive(&dir_archive(&root, 0o644).unwrap());

        assert_eq!(
            entries.get("testdata/real.cfg"),
            Some(&("cfg".to_string(), 0o644))
        );
        assert_eq!(
            entries.get("testdata/lua/init.lua"),
            Some(&("box.cfg{}".to_string(), 0o644))
        );
        assert!(!entries.contains_key("testdata/link"));
    }
}
