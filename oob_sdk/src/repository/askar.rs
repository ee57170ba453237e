use aries_askar::{
    ErrorKind, StoreKeyMethod,
    entry::{EntryOperation, EntryTag, TagFilter},
};
use async_trait::async_trait;

use super::OutOfBandRepository;
use crate::{
    error::Error,
    record::{OutOfBandQuery, OutOfBandRecord},
};

const CATEGORY: &str = "oob_record";

/// An implementation of the record repository using Aries Askar
pub struct AskarRepository {
    inner: aries_askar::Store,
    url: String,
}

impl AskarRepository {
    /// Create a new store
    pub async fn new(url: &str, password: &[u8]) -> Result<Self, Error> {
        let pass_key = aries_askar::Store::new_raw_key(Some(password))?;

        let inner =
            aries_askar::Store::provision(url, StoreKeyMethod::RawKey, pass_key, None, true)
                .await?;

        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    /// Open an existing store
    pub async fn open(url: &str, password: &[u8]) -> Result<Self, Error> {
        let pass_key = aries_askar::Store::new_raw_key(Some(password))?;

        let inner =
            aries_askar::Store::open(url, Some(StoreKeyMethod::RawKey), pass_key, None).await?;

        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    pub async fn close(self) -> Result<(), Error> {
        self.inner.close().await?;

        Ok(())
    }

    /// Close and remove the store
    pub async fn destroy(self) -> Result<(), Error> {
        self.inner.close().await?;
        aries_askar::Store::remove(&self.url).await?;

        Ok(())
    }

    fn decode(value: &[u8]) -> Result<OutOfBandRecord, Error> {
        serde_json::from_slice(value)
            .map_err(|_| Error::DecodeState("could not decode out-of-band record"))
    }
}

fn entry_tags(record: &OutOfBandRecord) -> Vec<EntryTag> {
    let tags = record.tags();

    let mut entry_tags = vec![
        EntryTag::Encrypted("role".to_string(), tags.role.to_string()),
        EntryTag::Encrypted("state".to_string(), tags.state.to_string()),
        EntryTag::Encrypted("invitation_id".to_string(), tags.invitation_id.to_string()),
    ];

    // a repeated tag name matches when any of its values does
    entry_tags.extend(tags.recipient_key_fingerprints.iter().map(|fingerprint| {
        EntryTag::Encrypted("recipient_key_fingerprint".to_string(), fingerprint.clone())
    }));

    entry_tags
}

fn tag_filter(query: &OutOfBandQuery) -> Option<TagFilter> {
    let mut filters = Vec::new();

    if let Some(role) = query.role {
        filters.push(TagFilter::is_eq("role", role.to_string()));
    }
    if let Some(state) = query.state {
        filters.push(TagFilter::is_eq("state", state.to_string()));
    }
    if let Some(invitation_id) = &query.invitation_id {
        filters.push(TagFilter::is_eq("invitation_id", invitation_id.clone()));
    }
    if let Some(fingerprint) = &query.recipient_key_fingerprint {
        filters.push(TagFilter::is_eq("recipient_key_fingerprint", fingerprint.clone()));
    }

    (!filters.is_empty()).then(|| TagFilter::all_of(filters))
}

#[async_trait]
impl OutOfBandRepository for AskarRepository {
    async fn save(&self, record: &OutOfBandRecord) -> Result<(), Error> {
        let data = serde_json::to_string(record)?;
        let tags = entry_tags(record);
        let mut conn = self.inner.session(None).await?;

        if let Err(e) = conn
            .insert(CATEGORY, &record.id, data.as_bytes(), Some(&tags), None)
            .await
        {
            if e.kind() == ErrorKind::Duplicate {
                return Err(Error::InvalidRecordState(format!(
                    "record {} already exists",
                    record.id
                )));
            }

            Err(Error::from(e))?;
        }

        conn.commit().await?;

        Ok(())
    }

    async fn update(&self, record: &OutOfBandRecord) -> Result<(), Error> {
        let data = serde_json::to_string(record)?;
        let tags = entry_tags(record);
        let mut conn = self.inner.session(None).await?;

        if let Err(e) = conn
            .update(
                EntryOperation::Replace,
                CATEGORY,
                &record.id,
                Some(data.as_bytes()),
                Some(&tags),
                None,
            )
            .await
        {
            if e.kind() == ErrorKind::NotFound {
                return Err(Error::RecordNotFound(record.id.clone()));
            }

            Err(Error::from(e))?;
        }

        conn.commit().await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        let mut conn = self.inner.session(None).await?;

        if let Err(e) = conn.remove(CATEGORY, id).await {
            if e.kind() == ErrorKind::NotFound {
                return Err(Error::RecordNotFound(id.to_string()));
            }

            Err(Error::from(e))?;
        }

        conn.commit().await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<OutOfBandRecord>, Error> {
        let mut conn = self.inner.session(None).await?;

        let record = match conn.fetch(CATEGORY, id, false).await? {
            Some(entry) => Some(Self::decode(&entry.value)?),
            None => None,
        };

        conn.commit().await?;

        Ok(record)
    }

    async fn get_all(&self) -> Result<Vec<OutOfBandRecord>, Error> {
        self.find_all_by_query(&OutOfBandQuery::default()).await
    }

    async fn find_all_by_query(
        &self,
        query: &OutOfBandQuery,
    ) -> Result<Vec<OutOfBandRecord>, Error> {
        let mut conn = self.inner.session(None).await?;
        let results = conn
            .fetch_all(Some(CATEGORY), tag_filter(query), None, None, false, false)
            .await?;

        let records = results
            .iter()
            .map(|item| Self::decode(&item.value))
            .collect::<Result<Vec<_>, _>>();

        conn.commit().await?;

        let mut records = records?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(records)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        invitation::{Invitation, OutOfBandInvitation},
        key::Key,
        record::{OutOfBandEvent, OutOfBandRole, OutOfBandState},
    };

    const FINGERPRINT: &str = "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

    #[tokio::test]
    #[serial_test::serial(askar)]
    async fn test_askar_repository() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("oob.sqlite").display());

        let mut invitation = OutOfBandInvitation::new("Faber");
        invitation.id = "inv-1".to_string();
        let mut record = OutOfBandRecord::new(
            OutOfBandRole::Receiver,
            Invitation::V1(invitation),
            vec![FINGERPRINT.to_string()],
        )
        .unwrap();

        {
            let repository = AskarRepository::new(&url, b"password").await.unwrap();
            repository.save(&record).await.unwrap();
            assert!(repository.save(&record).await.is_err());

            record.apply(OutOfBandEvent::BeginAccept).unwrap();
            repository.update(&record).await.unwrap();

            repository.close().await.unwrap();
        }

        {
            let repository = AskarRepository::open(&url, b"password").await.unwrap();

            let stored = repository.get_by_id(&record.id).await.unwrap();
            assert_eq!(stored, record);
            assert_eq!(stored.state, OutOfBandState::PrepareResponse);

            let found = repository
                .find_all_by_query(&OutOfBandQuery::default().invitation_id("inv-1"))
                .await
                .unwrap();
            assert_eq!(found.len(), 1);

            let receivers = repository
                .find_all_by_query(&OutOfBandQuery::default().role(OutOfBandRole::Receiver))
                .await
                .unwrap();
            assert_eq!(receivers, vec![record.clone()]);

            let senders = repository
                .find_all_by_query(&OutOfBandQuery::default().role(OutOfBandRole::Sender))
                .await
                .unwrap();
            assert!(senders.is_empty());

            // tags follow the update, not the initial insert
            let initial = repository
                .find_all_by_query(&OutOfBandQuery::default().state(OutOfBandState::Initial))
                .await
                .unwrap();
            assert!(initial.is_empty());

            let key = Key::from_fingerprint(FINGERPRINT).unwrap();
            let by_key = repository
                .find_all_by_query(
                    &OutOfBandQuery::default()
                        .recipient_key(&key)
                        .role(OutOfBandRole::Receiver),
                )
                .await
                .unwrap();
            assert_eq!(by_key.len(), 1);

            let other = repository
                .find_all_by_query(&OutOfBandQuery::default().invitation_id("inv-2"))
                .await
                .unwrap();
            assert!(other.is_empty());

            repository.delete(&record.id).await.unwrap();
            assert!(repository.find_by_id(&record.id).await.unwrap().is_none());

            repository.destroy().await.unwrap();
        }
    }
}
