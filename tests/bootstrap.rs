//! End-to-end bootstrap tests
//!
//! These drive the whole pipeline through the public API: parse flags,
//! validate, assemble the configuration, run the server on an ephemeral
//! port, and shut it down through the cancellation token. No external
//! cluster or etcd is needed; the informer watch loops simply retry
//! against the server's own loopback endpoint until cancelled.

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use flotilla::error::Error;
use flotilla::options::features::FeatureGates;
use flotilla::options::Options;
use flotilla::server::init_crypto_provider;
use flotilla::START_INFORMERS_HOOK;

fn ephemeral_options(extra: &[&str]) -> Options {
    let mut argv = vec![
        "flotilla-apiserver",
        "--bind-address",
        "127.0.0.1",
        "--secure-port",
        "0",
    ];
    argv.extend_from_slice(extra);
    Options::parse_from(argv)
}

#[tokio::test]
async fn server_boots_and_stops_on_cancellation() {
    init_crypto_provider();
    let opts = ephemeral_options(&[]);
    let shutdown = CancellationToken::new();

    let run = tokio::spawn(opts.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown timed out")
        .expect("run task panicked")
        .expect("run returned an error");
}

#[tokio::test]
async fn cancelling_before_startup_stops_promptly() {
    init_crypto_provider();
    let opts = ephemeral_options(&[]);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(10), opts.run(shutdown))
        .await
        .expect("run never observed the cancelled token")
        .expect("run returned an error");
}

#[tokio::test]
async fn invalid_flags_fail_before_anything_starts() {
    init_crypto_provider();
    let mut opts = ephemeral_options(&[]);
    opts.etcd.prefix = "registry".to_string();
    opts.features.overrides = vec!["Bogus=true".to_string()];

    let err = opts.run(CancellationToken::new()).await.unwrap_err();
    match err {
        Error::Validation(errs) => {
            assert_eq!(errs.len(), 2, "got {errs}");
            let groups: Vec<_> = errs.iter().map(|e| e.group).collect();
            assert!(groups.contains(&"etcd"));
            assert!(groups.contains(&"feature-gates"));
        }
        other => panic!("expected aggregated validation errors, got {other}"),
    }
}

#[tokio::test]
async fn unknown_admission_plugin_is_rejected_up_front() {
    init_crypto_provider();
    let opts = ephemeral_options(&["--enable-admission-plugins", "Ghost"]);
    let err = opts.run(CancellationToken::new()).await.unwrap_err();
    match err {
        Error::Validation(errs) => {
            assert_eq!(errs.len(), 1);
            assert_eq!(errs.iter().next().unwrap().group, "admission");
        }
        other => panic!("expected a validation error, got {other}"),
    }
}

#[tokio::test]
async fn assembled_server_advertises_the_informer_hook() {
    init_crypto_provider();
    let mut opts = ephemeral_options(&[]);
    // The full pipeline: complete, validate, assemble, build.
    opts.complete().unwrap();
    opts.validate().unwrap();
    let config = opts.config(&FeatureGates::defaults()).unwrap();

    let mut server = config.complete().build().unwrap();
    server
        .add_post_start_hook(START_INFORMERS_HOOK, |_ctx| async { Ok(()) })
        .unwrap();
    assert_eq!(
        server.post_start_hook_names(),
        vec![START_INFORMERS_HOOK.to_string()]
    );

    let dup = server.add_post_start_hook(START_INFORMERS_HOOK, |_ctx| async { Ok(()) });
    assert!(matches!(dup, Err(Error::HookRegistration(_))));
}
