// dbus-notifier/examples/send_notification.rs

use dbus_notifier::config::ConfigLoader;
use dbus_notifier::{logging, Hints, Notification, NotificationConfig, NotifierContext, Urgency};

#[tokio::main]
async fn main() {
    println!("dbus-notifier demo");
    println!("==================");

    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration, using defaults: {}", e);
            Default::default()
        }
    };
    if let Err(e) = logging::init_logging(&config.logging, false) {
        eprintln!("Failed to initialize logging: {}", e);
        logging::init_minimal_logging();
    }

    let context = NotifierContext::with_config(&config);

    match context.server_information().await {
        Ok(info) => println!(
            "Notification server: {} {} by {} (spec {})",
            info.name, info.version, info.vendor, info.spec_version
        ),
        Err(e) => {
            eprintln!("No notification server reachable: {}", e);
            return;
        }
    }
    match context.supported_capabilities().await {
        Ok(caps) => println!("Capabilities: {}", caps.join(", ")),
        Err(e) => eprintln!("GetCapabilities failed: {}", e),
    }

    let mut notification = Notification::new(
        &context,
        NotificationConfig {
            app_name: "dbus-notifier".to_string(),
            summary: "Build finished".to_string(),
            body: "Click the notification or pick an action.".to_string(),
            timeout: 10_000,
            hints: Hints {
                urgency: Some(Urgency::Normal),
                category: Some("transfer.complete".to_string()),
                ..Hints::default()
            },
            ..NotificationConfig::default()
        },
    );
    notification.set_default_action(|| println!("Default action invoked."));
    if let Err(e) = notification.add_action("Open log", || println!("'Open log' invoked.")) {
        eprintln!("Could not add action: {}", e);
    }
    if let Err(e) = notification.add_inline_reply("Reply", |text| println!("Replied: {}", text)) {
        eprintln!("Could not add inline reply: {}", e);
    }

    let mut events = notification.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("Event: {:?}", event);
        }
    });

    println!("Showing notification, waiting for it to close...");
    match notification.show().await {
        Ok(result) => println!("Notification {} closed: {:?}", result.id, result.reason),
        Err(e) => eprintln!("Failed to show notification: {}", e),
    }

    // Leave time for the deferred session disconnect.
    tokio::time::sleep(dbus_notifier::DISCONNECT_DELAY * 2).await;
}
