use anyhow::Result;
use std::fs;
use std::sync::{Arc, Mutex};
use tntbox::domain::ContainerRuntime;
use tntbox::options::{
    with_config_file, with_config_file_mapping, with_env, with_hook_on_start, with_hook_on_stop,
    with_logger, with_name, with_scripts, with_started,
};
use tntbox::test_support::{MockRuntime, RecordingSink};
use tntbox::{ContainerState, Error, LogAttachment, new_container, run_container, server_host_port};

fn runtime() -> (Arc<MockRuntime>, Arc<dyn ContainerRuntime>) {
    let mock = Arc::new(MockRuntime::new());
    (mock.clone(), mock)
}

#[tokio::test]
async fn test_reused_container_is_adopted_without_copies() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let init = temp.path().join("init.lua");
    fs::write(&init, "box.cfg{}")?;

    let (mock, rt) = runtime();
    let opts = vec![
        with_name("tnt-reuse", true),
        with_config_file_mapping(&init, "/opt/tarantool/init.lua"),
    ];

    let first = run_container(rt.clone(), &opts).await?;
    assert!(first.is_running());
    let copies_after_first = mock
        .get_commands()
        .iter()
        .filter(|c| c.starts_with("copy_file:"))
        .count();

    let second = new_container(rt, &opts).await?;

    assert_eq!(second.id(), first.id());
    assert_eq!(second.state(), ContainerState::Running);
    let commands = mock.get_commands();
    assert_eq!(commands.iter().filter(|c| c.starts_with("create:")).count(), 1);
    assert_eq!(
        commands.iter().filter(|c| c.starts_with("copy_file:")).count(),
        copies_after_first
    );
    Ok(())
}

#[tokio::test]
async fn test_same_name_without_reuse_fails_to_create() -> Result<()> {
    let (_mock, rt) = runtime();

    let _first = run_container(rt.clone(), &[with_name("tnt-dup", false)]).await?;
    let err = new_container(rt, &[with_name("tnt-dup", false)])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Provisioning { operation: "create", .. }));
    assert!(err.to_string().contains("tnt-dup"));
    Ok(())
}

#[tokio::test]
async fn test_stopped_reused_container_starts_again() -> Result<()> {
    let (mock, rt) = runtime();
    let id = mock.add_container("tnt-old", ContainerState::Stopped);

    let container = new_container(rt, &[with_name("tnt-old", true), with_started(true)]).await?;

    assert_eq!(container.id(), id);
    assert!(container.is_running());
    assert_eq!(mock.get_state(&id), Some(ContainerState::Running));
    Ok(())
}

#[tokio::test]
async fn test_reused_running_container_forwards_logs() -> Result<()> {
    let (mock, rt) = runtime();
    let id = mock.add_container("tnt-logs", ContainerState::Running);
    mock.set_logs(&id, "entering the event loop\n");
    let sink = Arc::new(RecordingSink::default());

    let mut container = new_container(
        rt,
        &[
            with_name("tnt-logs", true),
            with_started(true),
            with_logger(sink.clone()),
        ],
    )
    .await?;

    assert_eq!(container.id(), id);
    assert_eq!(container.log_attachment(), &LogAttachment::Attached);
    assert!(!mock.get_commands().contains(&format!("start:{id}")));

    container.start().await?;
    let follows = mock
        .get_commands()
        .iter()
        .filter(|c| c.starts_with("follow_logs:"))
        .count();
    assert_eq!(follows, 1);
    Ok(())
}

#[tokio::test]
async fn test_config_file_is_copied_before_start() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let cfg = temp.path().join("tarantool.cfg");
    fs::write(&cfg, "primary_port = 3301\n")?;

    let (mock, rt) = runtime();
    let container = run_container(rt, &[with_config_file(&cfg)]).await?;

    let commands = mock.get_commands();
    let copy = commands
        .iter()
        .position(|c| c.ends_with(":/etc/tarantool/tarantool.cfg"))
        .expect("config copied");
    let start = commands
        .iter()
        .position(|c| c.starts_with("start:"))
        .expect("started");
    assert!(copy < start);

    let (content, mode) = mock
        .file(container.id(), "/etc/tarantool/tarantool.cfg")
        .expect("file present");
    assert_eq!(content, b"primary_port = 3301\n");
    assert_eq!(mode, 0o755);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_script_dir_copy_includes_symlink_targets() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let shared = temp.path().join("shared");
    let scripts = temp.path().join("scripts");
    fs::create_dir_all(&shared)?;
    fs::create_dir_all(scripts.join("lib"))?;
    fs::write(shared.join("queue.lua"), "return {}")?;
    fs::write(scripts.join("init.lua"), "require('lib.queue')")?;
    std::os::unix::fs::symlink(shared.join("queue.lua"), scripts.join("lib/queue.lua"))?;

    let (mock, rt) = runtime();
    let container = run_container(rt, &[with_scripts(&scripts, "/opt/tarantool/")]).await?;

    let (init, _) = mock
        .file(container.id(), "/opt/tarantool/scripts/init.lua")
        .expect("regular file copied");
    assert_eq!(init, b"require('lib.queue')");

    let (linked, mode) = mock
        .file(container.id(), "/opt/tarantool/scripts/lib/queue.lua")
        .expect("link target copied");
    assert_eq!(linked, b"return {}");
    assert_eq!(mode, 0o755);
    Ok(())
}

#[tokio::test]
async fn test_prefixed_env_is_forwarded() -> Result<()> {
    // SAFETY: the variable name is unique to this test.
    unsafe {
        std::env::set_var("TNTBOX_LIFECYCLE_USER", "guest");
    }

    let (mock, rt) = runtime();
    let container = new_container(rt, &[with_env("TNTBOX_LIFECYCLE_")]).await?;

    let spec = mock.container(container.id()).expect("created").spec;
    assert_eq!(
        spec.env.get("TNTBOX_LIFECYCLE_USER").map(String::as_str),
        Some("guest")
    );
    assert_eq!(container.state(), ContainerState::Created);
    Ok(())
}

#[tokio::test]
async fn test_connection_hooks_follow_lifecycle() -> Result<()> {
    let (mock, rt) = runtime();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let on_start = seen.clone();
    let on_stop = seen.clone();
    let mut container = run_container(
        rt,
        &[
            with_hook_on_start(move |conn| {
                let seen = on_start.clone();
                async move {
                    seen.lock().unwrap().push(format!("up {conn}"));
                    anyhow::Ok(())
                }
            }),
            with_hook_on_stop(move |conn| {
                let seen = on_stop.clone();
                async move {
                    seen.lock().unwrap().push(format!("down {conn}"));
                    anyhow::Ok(())
                }
            }),
        ],
    )
    .await?;
    assert_eq!(server_host_port(&container).await?, "localhost:49153");

    container.stop().await?;
    container.start().await?;
    container.stop().await?;
    container.terminate().await?;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "up localhost:49153",
            "down localhost:49153",
            "up localhost:49154",
            "down localhost:49154",
        ]
    );
    assert_eq!(container.state(), ContainerState::Terminated);
    assert_eq!(mock.get_state(container.id()), None);
    Ok(())
}
