use nimbus_client::{ShadeStatus, StatusPath, StatusStoreError, StatusStoreTrait};
use serde_json::Value;

use crate::{Params, utils::create_store};

pub async fn get(params: Params, path: &str) -> Result<(), StatusStoreError> {
    let path: StatusPath = path.parse()?;
    let store = create_store(params).await?;
    let value = store.read(path).await?;
    println!(
        "{path}: {}",
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    );
    store.disconnect().await
}

pub async fn set(params: Params, path: &str, value: &str) -> Result<(), StatusStoreError> {
    let path: StatusPath = path.parse()?;
    let value: Value =
        serde_json::from_str(value).map_err(|e| StatusStoreError::Malformed(e.to_string()))?;
    let store = create_store(params).await?;
    store.write(path, value).await?;
    println!("{path} updated");
    store.disconnect().await
}

pub async fn delete(params: Params, path: &str) -> Result<(), StatusStoreError> {
    let path: StatusPath = path.parse()?;
    let store = create_store(params).await?;
    store.delete(path).await?;
    println!("{path} removed");
    store.disconnect().await
}

pub async fn init(params: Params) -> Result<(), StatusStoreError> {
    let store = create_store(params).await?;
    let current = store.read(StatusPath::Root).await?;
    match ShadeStatus::from_snapshot(&current) {
        Err(StatusStoreError::NotFound) => {
            let value = serde_json::to_value(ShadeStatus::default())
                .map_err(|e| StatusStoreError::Malformed(e.to_string()))?;
            store.write(StatusPath::Root, value).await?;
            println!("Default status record created");
        }
        Ok(status) => println!("Status record already present: {status:?}"),
        Err(e) => return Err(e),
    }
    store.disconnect().await
}
