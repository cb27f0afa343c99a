#[path = "../../common/tests/support/mod.rs"]
mod support;

use std::{
    fs,
    io::Read,
    path::Path,
    sync::Arc,
    thread,
};

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use support::{write, Authority};
use tollgate_common::{
    session::{self, build_server_policy},
    Endpoint, Role,
};

fn client(cwd: &Path, home: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("tollgate-client")?;
    cmd.current_dir(cwd).env("HOME", home).env_remove("RUST_LOG");
    Ok(cmd)
}

/// CA, client identity and a `.config` that names them with relative paths
fn client_project(root: &Path, ca: &Authority) -> Result<()> {
    let leaf = ca.issue("client")?;
    write(root, "pki/ca.pem", &ca.pem())?;
    write(root, "pki/client.pem", &leaf.cert_pem())?;
    write(root, "pki/client.key", &leaf.key_pem())?;
    write(
        root,
        ".config",
        "root-cert = pki/ca.pem\n\
         client-tls-cert = pki/client.pem\n\
         client-tls-key = pki/client.key\n\
         root-name = localhost\n\
         host = 127.0.0.1\n",
    )?;
    Ok(())
}

#[test]
fn config_show_reports_resolved_paths_and_sources() -> Result<()> {
    let root = tempfile::tempdir()?;
    let nested = root.path().join("a/b");
    fs::create_dir_all(&nested)?;
    write(root.path(), ".config", "root-cert = pki/ca.pem\nport = 9000\n")?;

    let output = client(&nested, root.path())?
        .args(["--port", "9443", "config", "show", "--json"])
        .output()?;
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["role"], "client");
    let options = report["options"].as_array().expect("options array");
    let find = |name: &str| options.iter().find(|o| o["name"] == name).cloned().expect(name);

    assert_eq!(find("port")["value"], "9443");
    assert_eq!(find("port")["source"], "flag");
    assert_eq!(
        find("root-cert")["value"],
        root.path().join("pki/ca.pem").display().to_string()
    );
    assert_eq!(find("root-cert")["source"], "file");
    assert_eq!(find("host")["source"], "default");
    assert!(options.iter().all(|o| o["name"] != "server-tls-key"));
    Ok(())
}

#[test]
fn config_init_writes_absolute_paths() -> Result<()> {
    let root = tempfile::tempdir()?;
    let work = root.path().join("work");
    let target = root.path().join("target-dir");
    fs::create_dir_all(&work)?;
    fs::create_dir_all(&target)?;

    client(&work, root.path())?
        .args(["--client-tls-cert", "certs/me.pem", "--host", "tls.example", "config", "init", "../target-dir"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote 2 option(s)"));

    let written = fs::read_to_string(target.join(".config"))?;
    let expected = work.join("certs/me.pem");
    assert!(written.contains(&format!("client-tls-cert = {}", expected.display())), "{written}");
    assert!(written.contains("host = tls.example"), "{written}");

    // Reading it back from elsewhere resolves to the same absolute path
    let output = client(root.path(), root.path())?
        .args(["--config", "target-dir/.config", "config", "show", "--json"])
        .output()?;
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let cert = report["options"]
        .as_array()
        .and_then(|o| o.iter().find(|o| o["name"] == "client-tls-cert").cloned())
        .expect("client-tls-cert");
    assert_eq!(cert["value"], expected.display().to_string());
    Ok(())
}

#[test]
fn config_init_into_missing_directory_is_bad_input() -> Result<()> {
    let root = tempfile::tempdir()?;
    client(root.path(), root.path())?
        .args(["config", "init", "does/not/exist"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("does not exist"));
    Ok(())
}

#[test]
fn config_init_refuses_values_that_would_not_read_back() -> Result<()> {
    let root = tempfile::tempdir()?;
    client(root.path(), root.path())?
        .args(["--root-name", "a\nb", "config", "init", "."])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("root-name"));
    assert!(!root.path().join(".config").exists());
    Ok(())
}

#[test]
fn malformed_input_exits_with_bad_request() -> Result<()> {
    let root = tempfile::tempdir()?;

    client(root.path(), root.path())?
        .args(["--host", "", "send", "hi"])
        .assert()
        .code(64);

    client(root.path(), root.path())?
        .args(["--port", "not-a-port", "send", "hi"])
        .assert()
        .code(64);

    write(root.path(), ".config", "[client]\nhost = x\n")?;
    client(root.path(), root.path())?
        .args(["config", "show"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("line 1"));
    Ok(())
}

#[test]
fn unreadable_credentials_are_an_internal_failure() -> Result<()> {
    let root = tempfile::tempdir()?;
    let ca = Authority::new("Tollgate Test CA")?;
    client_project(root.path(), &ca)?;
    fs::remove_file(root.path().join("pki/client.key"))?;

    client(root.path(), root.path())?
        .args(["send", "hi"])
        .assert()
        .code(70)
        .stderr(predicate::str::contains("client.key"));
    Ok(())
}

#[test]
fn send_delivers_text_to_the_server() -> Result<()> {
    let root = tempfile::tempdir()?;
    let ca = Authority::new("Tollgate Test CA")?;
    client_project(root.path(), &ca)?;

    let policy = build_server_policy(&ca.issue("localhost")?.bundle(Role::Server, &ca)?)?;
    let listener = session::listen(
        &Endpoint {
            host: "127.0.0.1".into(),
            port: 0,
        },
        Arc::new(policy),
    )?;
    let port = listener.local_addr()?.port();
    let server = thread::spawn(move || -> Result<Vec<u8>> {
        let mut stream = listener.accept()?.handshake()?;
        let mut received = Vec::new();
        stream.read_to_end(&mut received)?;
        Ok(received)
    });

    client(root.path(), root.path())?
        .args(["--port", &port.to_string(), "send", "hello tollgate"])
        .assert()
        .success();

    assert_eq!(server.join().expect("server thread")?, b"hello tollgate");
    Ok(())
}

#[test]
fn untrusted_server_is_authentication_denied() -> Result<()> {
    let root = tempfile::tempdir()?;
    let ca = Authority::new("Tollgate Test CA")?;
    let rogue = Authority::new("Rogue CA")?;
    client_project(root.path(), &ca)?;

    let policy = build_server_policy(&rogue.issue("localhost")?.bundle(Role::Server, &ca)?)?;
    let listener = session::listen(
        &Endpoint {
            host: "127.0.0.1".into(),
            port: 0,
        },
        Arc::new(policy),
    )?;
    let port = listener.local_addr()?.port();
    let server = thread::spawn(move || listener.accept().map(|pending| pending.handshake().is_err()));

    client(root.path(), root.path())?
        .args(["--port", &port.to_string(), "send", "hello"])
        .assert()
        .code(77);

    assert!(server.join().expect("server thread")?);
    Ok(())
}

#[test]
fn untrusted_client_is_authentication_denied() -> Result<()> {
    let root = tempfile::tempdir()?;
    let ca = Authority::new("Tollgate Test CA")?;
    let other = Authority::new("Other CA")?;
    client_project(root.path(), &ca)?;

    // The client trusts this server, but the server only trusts `other`
    let policy = build_server_policy(&ca.issue("localhost")?.bundle(Role::Server, &other)?)?;
    let listener = session::listen(
        &Endpoint {
            host: "127.0.0.1".into(),
            port: 0,
        },
        Arc::new(policy),
    )?;
    let port = listener.local_addr()?.port();
    let server = thread::spawn(move || listener.accept().map(|pending| pending.handshake().is_err()));

    client(root.path(), root.path())?
        .args(["--port", &port.to_string(), "send", "hello"])
        .assert()
        .code(77);

    assert!(server.join().expect("server thread")?);
    Ok(())
}
