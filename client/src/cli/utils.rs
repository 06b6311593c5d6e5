use nimbus_client::{MqttStatusStore, MqttStoreOptions, StatusStoreError};

use crate::Params;

pub async fn create_store(params: Params) -> Result<MqttStatusStore, StatusStoreError> {
    let options = MqttStoreOptions::builder()
        .host(params.host)
        .port(params.port)
        .user(params.user)
        .password(params.password)
        .root_topic(params.root_topic)
        .build()
        .map_err(|e| StatusStoreError::Connection(e.to_string()))?;
    let store = MqttStatusStore::connect(options).await?;
    store.wait_ready().await?;
    Ok(store)
}
