use nimbus_client::{ShadePolarity, StatusStoreError, StatusStoreTrait, rain_status_label};

use crate::{Params, utils::create_store};

pub async fn listen(params: Params) -> Result<(), StatusStoreError> {
    let store = create_store(params).await?;
    let mut subscription = store.subscribe().await?;
    println!("Listening for status changes, press Ctrl-C to quit");

    loop {
        tokio::select! {
            event = subscription.next() => {
                match event {
                    Some(Ok(status)) => {
                        let position = status.position(ShadePolarity::default());
                        println!(
                            "automatic: {}, manual shade: {} min, rain: {}, shade: {}, countdown: {}",
                            status.automatic_mode,
                            status.manual_shade,
                            rain_status_label(status.rain_status),
                            position,
                            status
                                .seconds_left()
                                .map(|s| format!("{s}s"))
                                .unwrap_or_else(|| "none".to_string()),
                        );
                    }
                    Some(Err(e)) => println!("Status error: {e}"),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Exiting...");
                break;
            }
        }
    }
    store.disconnect().await
}
