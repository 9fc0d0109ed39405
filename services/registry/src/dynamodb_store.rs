use crate::config::DynamoDbConfig;
use crate::metadata::{MetadataField, MetadataRecord};
use crate::record_store::{CreateOutcome, RecordStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_types::region::Region;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

type Item = HashMap<String, AttributeValue>;

/// Metadata record store in a DynamoDB table with `filename` as partition key
pub struct DynamoDbRecordStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDbRecordStore {
    /// Create a store for `config.table_name`, falling back to `default_region`
    pub async fn new(config: &DynamoDbConfig, default_region: &str) -> Result<Self> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| default_region.to_string());

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&aws_config);

        // Configure custom endpoint for DynamoDB Local/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(
            table = %config.table_name,
            region = %region,
            "DynamoDB record store initialized"
        );

        Ok(Self {
            client: DynamoDbClient::from_conf(builder.build()),
            table_name: config.table_name.clone(),
        })
    }

    fn record_to_item(record: &MetadataRecord) -> Item {
        MetadataField::ALL
            .iter()
            .map(|field| {
                (
                    field.as_str().to_string(),
                    AttributeValue::S(record.field(*field).to_string()),
                )
            })
            .collect()
    }

    /// Absent or non-string attributes read back as empty values
    fn item_to_record(item: &Item) -> MetadataRecord {
        let attr = |field: MetadataField| {
            item.get(field.as_str())
                .and_then(|v| v.as_s().ok())
                .cloned()
                .unwrap_or_default()
        };

        MetadataRecord {
            filename: attr(MetadataField::Filename),
            author: attr(MetadataField::Author),
            label: attr(MetadataField::Label),
            kind: attr(MetadataField::Type),
            words: attr(MetadataField::Words),
        }
    }

    fn is_conditional_check_failed(err: &SdkError<PutItemError>) -> bool {
        match err {
            SdkError::ServiceError(service_err) => matches!(
                service_err.err(),
                PutItemError::ConditionalCheckFailedException(_)
            ),
            _ => false,
        }
    }
}

#[async_trait]
impl RecordStore for DynamoDbRecordStore {
    #[instrument(skip(self))]
    async fn get(&self, filename: &str) -> Result<Option<MetadataRecord>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(
                MetadataField::Filename.as_str(),
                AttributeValue::S(filename.to_string()),
            )
            .consistent_read(true)
            .send()
            .await
            .context("DynamoDB GetItem failed")?;

        Ok(response.item().map(Self::item_to_record))
    }

    #[instrument(skip(self, record), fields(filename = %record.filename))]
    async fn put(&self, record: &MetadataRecord) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::record_to_item(record)))
            .send()
            .await
            .context("DynamoDB PutItem failed")?;

        debug!(filename = %record.filename, "Metadata record written");
        Ok(())
    }

    #[instrument(skip(self, record), fields(filename = %record.filename))]
    async fn create(&self, record: &MetadataRecord) -> Result<CreateOutcome> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::record_to_item(record)))
            .condition_expression("attribute_not_exists(#pk)")
            .expression_attribute_names("#pk", MetadataField::Filename.as_str())
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(filename = %record.filename, "Metadata record created");
                Ok(CreateOutcome::Created)
            }
            Err(e) if Self::is_conditional_check_failed(&e) => {
                debug!(filename = %record.filename, "Metadata record already present");
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e).context("DynamoDB conditional PutItem failed"),
        }
    }

    #[instrument(skip(self))]
    async fn scan(&self) -> Result<Vec<MetadataRecord>> {
        let mut records = Vec::new();
        let mut last_evaluated_key = None;

        loop {
            let mut request = self.client.scan().table_name(&self.table_name);

            if let Some(key) = last_evaluated_key.take() {
                request = request.set_exclusive_start_key(Some(key));
            }

            let response = request.send().await.context("DynamoDB Scan failed")?;

            records.extend(response.items().iter().map(Self::item_to_record));

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => {
                    last_evaluated_key = Some(key.clone());
                }
                _ => break,
            }
        }

        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
            .context("DynamoDB table unreachable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_item_conversion() {
        let record = MetadataRecord::new("a.mp3", "x", "y", "z", "w");

        let item = DynamoDbRecordStore::record_to_item(&record);
        assert_eq!(item.len(), 5);
        assert_eq!(item.get("type"), Some(&AttributeValue::S("z".to_string())));

        assert_eq!(DynamoDbRecordStore::item_to_record(&item), record);
    }

    #[test]
    fn test_missing_and_non_string_attributes_read_empty() {
        let mut item = Item::new();
        item.insert("filename".to_string(), AttributeValue::S("a.mp3".to_string()));
        item.insert("words".to_string(), AttributeValue::N("3".to_string()));

        let record = DynamoDbRecordStore::item_to_record(&item);
        assert_eq!(record.filename, "a.mp3");
        assert_eq!(record.author, "");
        assert_eq!(record.words, "");
    }
}
