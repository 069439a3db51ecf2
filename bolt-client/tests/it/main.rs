use std::time::Duration;

use bolt_client::{
    device::{DevicePath, Status},
    registry::RegistryEvent,
    session::SessionState,
    startup::Settings,
};
use color_eyre::eyre;

use crate::helpers::{FakeBolt, FakeDevice, DISPLAY_PATH, DOCK_PATH, HOST_PATH};

pub mod helpers;

#[tokio::test]
async fn initialize_lists_peripherals_but_not_the_host() -> eyre::Result<()> {
    let dbus = helpers::launch_system_dbus().await??;
    let bolt = FakeBolt::start(&dbus).await?;
    bolt.insert(HOST_PATH, FakeDevice::host()).await?;
    bolt.insert(DOCK_PATH, FakeDevice::peripheral("dock", "connected", false))
        .await?;

    let app = helpers::build_application(helpers::make_settings(&dbus)).await?;

    assert_eq!(app.registry.len(), 1);
    let dock = app
        .registry
        .find_by_uid("dock")
        .expect("dock should be tracked");
    assert_eq!(dock.path(), &DevicePath::from(DOCK_PATH));
    assert_eq!(dock.details().title, "Acme Dock");
    assert_eq!(dock.details().generation, "USB4");
    assert_eq!(dock.details().bandwidth, "40 Gb/s (2 lanes @ 20 Gb/s)");
    assert_eq!(
        dock.state(),
        SessionState {
            status: Status::Connected,
            stored: false,
        }
    );
    let presentation = dock.presentation();
    assert_eq!(presentation.status_text, "Connected");
    assert!(!presentation.authorize_enabled);
    assert!(presentation.trust_enabled);

    Ok(())
}

#[tokio::test]
async fn build_fails_without_daemon() -> eyre::Result<()> {
    let dbus = helpers::launch_system_dbus().await??;

    let err = helpers::build_application(helpers::make_settings(&dbus))
        .await
        .expect_err("nobody owns the bolt name");
    assert!(err.is_connection(), "unexpected error: {err:?}");

    Ok(())
}

#[tokio::test]
async fn registry_follows_plug_and_unplug() -> eyre::Result<()> {
    let dbus = helpers::launch_system_dbus().await??;
    let bolt = FakeBolt::start(&dbus).await?;

    let app = helpers::build_application(helpers::make_settings(&dbus)).await?;
    assert!(app.registry.is_empty());
    let mut events = app.registry.subscribe();
    let (_handle, _task) = app.run();

    bolt.plug(HOST_PATH, FakeDevice::host()).await?;
    bolt.plug(DISPLAY_PATH, FakeDevice::peripheral("display", "connected", false))
        .await?;

    // The host never shows up, so the first event is the display.
    let RegistryEvent::Added { path, details, .. } = helpers::next_event(&mut events).await
    else {
        panic!("expected the display to be added");
    };
    assert_eq!(path, DevicePath::from(DISPLAY_PATH));
    assert_eq!(details.uid, "display");

    bolt.unplug(DISPLAY_PATH).await?;
    let RegistryEvent::Removed { path } = helpers::next_event(&mut events).await else {
        panic!("expected the display to be removed");
    };
    assert_eq!(path, DevicePath::from(DISPLAY_PATH));

    Ok(())
}

#[tokio::test]
async fn authorize_then_trust_then_forget() -> eyre::Result<()> {
    let dbus = helpers::launch_system_dbus().await??;
    let bolt = FakeBolt::start(&dbus).await?;
    bolt.insert(DOCK_PATH, FakeDevice::peripheral("dock", "connected", false))
        .await?;

    let app = helpers::build_application(helpers::make_settings(&dbus)).await?;
    let mut state = app
        .registry
        .find_by_uid("dock")
        .expect("dock should be tracked")
        .subscribe();
    let (handle, _task) = app.run();
    let dock = DevicePath::from(DOCK_PATH);

    handle.authorize(dock.clone()).await?;
    let authorized =
        helpers::wait_for_state(&mut state, |s| s.status == Status::Authorized).await;
    assert!(!authorized.stored);
    let presentation = authorized.presentation();
    assert_eq!(presentation.status_text, "Connected & Authorized");
    assert!(!presentation.authorize_enabled);
    assert!(presentation.trust_enabled);

    // Already authorized, nothing is sent to the daemon.
    handle.authorize(dock.clone()).await?;

    handle.trust(dock.clone()).await?;
    let trusted = helpers::wait_for_state(&mut state, |s| s.stored).await;
    assert_eq!(trusted.status, Status::Authorized);
    assert_eq!(
        trusted.presentation().status_text,
        "Connected & Authorized, Trusted"
    );
    assert_eq!(trusted.presentation().trust_label, "Forget");

    let err = handle
        .trust(dock.clone())
        .await
        .expect_err("already trusted");
    assert!(matches!(err, bolt_client::Error::InvalidState(_)));

    handle.toggle_trust(dock.clone()).await?;
    let forgotten = helpers::wait_for_state(&mut state, |s| !s.stored).await;
    assert_eq!(forgotten.status, Status::Authorized);

    Ok(())
}

#[tokio::test]
async fn status_changes_from_the_daemon_reach_the_session() -> eyre::Result<()> {
    let dbus = helpers::launch_system_dbus().await??;
    let bolt = FakeBolt::start(&dbus).await?;
    bolt.insert(DOCK_PATH, FakeDevice::peripheral("dock", "authorized", true))
        .await?;

    let app = helpers::build_application(helpers::make_settings(&dbus)).await?;
    let mut state = app
        .registry
        .find_by_uid("dock")
        .expect("dock should be tracked")
        .subscribe();
    let (_handle, _task) = app.run();

    bolt.set_status(DOCK_PATH, "disconnected").await?;
    let disconnected =
        helpers::wait_for_state(&mut state, |s| s.status == Status::Disconnected).await;
    assert!(disconnected.stored);
    let presentation = disconnected.presentation();
    assert_eq!(presentation.status_text, "Disconnected, Trusted");
    assert!(presentation.authorize_enabled);
    assert!(!presentation.trust_enabled);

    Ok(())
}

#[tokio::test]
async fn slow_daemon_call_times_out() -> eyre::Result<()> {
    let dbus = helpers::launch_system_dbus().await??;
    let bolt = FakeBolt::start(&dbus).await?;
    bolt.insert(
        DOCK_PATH,
        FakeDevice {
            authorize_delay: Duration::from_secs(3),
            ..FakeDevice::peripheral("dock", "connected", false)
        },
    )
    .await?;

    let settings = Settings {
        call_timeout: Duration::from_millis(300),
        ..helpers::make_settings(&dbus)
    };
    let app = helpers::build_application(settings).await?;
    let state = app
        .registry
        .find_by_uid("dock")
        .expect("dock should be tracked")
        .subscribe();
    let (handle, _task) = app.run();

    let err = handle
        .authorize(DevicePath::from(DOCK_PATH))
        .await
        .expect_err("authorize should not outlive the call timeout");
    assert!(
        matches!(
            err,
            bolt_client::Error::Timeout {
                method: "Authorize",
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert!(err.is_connection());
    assert_eq!(state.borrow().status, Status::Connected);

    Ok(())
}
