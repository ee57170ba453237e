use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{
    error::Error,
    events::{AgentEvent, EventEmitter},
    record::{OutOfBandEvent, OutOfBandQuery, OutOfBandRecord},
};

#[cfg(feature = "askar")]
mod askar;

#[cfg(feature = "askar")]
pub use askar::AskarRepository;

// ANCHOR: custom-repository-mbBook
#[async_trait]
pub trait OutOfBandRepository: Send + Sync {
    /// Store a new record
    async fn save(&self, record: &OutOfBandRecord) -> Result<(), Error>;

    /// Replace an existing record
    async fn update(&self, record: &OutOfBandRecord) -> Result<(), Error>;

    async fn delete(&self, id: &str) -> Result<(), Error>;

    async fn find_by_id(&self, id: &str) -> Result<Option<OutOfBandRecord>, Error>;

    /// All records, oldest first
    async fn get_all(&self) -> Result<Vec<OutOfBandRecord>, Error>;

    async fn find_all_by_query(&self, query: &OutOfBandQuery)
    -> Result<Vec<OutOfBandRecord>, Error>;

    async fn get_by_id(&self, id: &str) -> Result<OutOfBandRecord, Error> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))
    }

    /// At most one record may match
    async fn find_single_by_query(
        &self,
        query: &OutOfBandQuery,
    ) -> Result<Option<OutOfBandRecord>, Error> {
        let mut records = self.find_all_by_query(query).await?;

        if records.len() > 1 {
            return Err(Error::InvalidRecordState(format!(
                "expected at most one record for {query:?}, found {}",
                records.len()
            )));
        }

        Ok(records.pop())
    }
}
// ANCHOR_END: custom-repository-mbBook

/// Apply a state machine event, persist the record and announce the change
pub(crate) async fn update_state(
    repository: &dyn OutOfBandRepository,
    events: &EventEmitter,
    record: &mut OutOfBandRecord,
    event: OutOfBandEvent,
) -> Result<(), Error> {
    let previous_state = record.apply(event)?;
    repository.update(record).await?;

    tracing::debug!(
        "out-of-band record {} changed state {previous_state} -> {}",
        record.id,
        record.state
    );

    events.emit(AgentEvent::OutOfBandStateChanged {
        record: record.clone(),
        previous_state: Some(previous_state),
    });

    Ok(())
}

/// Keeps records in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepository {
    records: Arc<RwLock<HashMap<String, OutOfBandRecord>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut records: Vec<OutOfBandRecord>) -> Vec<OutOfBandRecord> {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }
}

#[async_trait]
impl OutOfBandRepository for InMemoryRepository {
    async fn save(&self, record: &OutOfBandRecord) -> Result<(), Error> {
        let mut records = self.records.write()?;

        if records.contains_key(&record.id) {
            return Err(Error::InvalidRecordState(format!(
                "record {} already exists",
                record.id
            )));
        }

        records.insert(record.id.clone(), record.clone());

        Ok(())
    }

    async fn update(&self, record: &OutOfBandRecord) -> Result<(), Error> {
        let mut records = self.records.write()?;

        let Some(stored) = records.get_mut(&record.id) else {
            return Err(Error::RecordNotFound(record.id.clone()));
        };
        *stored = record.clone();

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.records
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<OutOfBandRecord>, Error> {
        Ok(self.records.read()?.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<OutOfBandRecord>, Error> {
        let records = self.records.read()?.values().cloned().collect();

        Ok(Self::sorted(records))
    }

    async fn find_all_by_query(
        &self,
        query: &OutOfBandQuery,
    ) -> Result<Vec<OutOfBandRecord>, Error> {
        let records = self
            .records
            .read()?
            .values()
            .filter(|record| query.matches(&record.tags()))
            .cloned()
            .collect();

        Ok(Self::sorted(records))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        invitation::{Invitation, OutOfBandInvitation},
        record::{OutOfBandRole, OutOfBandState},
    };

    fn record(role: OutOfBandRole, invitation_id: &str) -> OutOfBandRecord {
        let mut invitation = OutOfBandInvitation::new("Faber");
        invitation.id = invitation_id.to_string();

        OutOfBandRecord::new(role, Invitation::V1(invitation), vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_crud() {
        let repository = InMemoryRepository::new();
        let mut record = record(OutOfBandRole::Sender, "inv-1");

        repository.save(&record).await.unwrap();
        assert!(matches!(
            repository.save(&record).await,
            Err(Error::InvalidRecordState(_))
        ));

        record.reusable = true;
        repository.update(&record).await.unwrap();
        assert!(repository.get_by_id(&record.id).await.unwrap().reusable);

        repository.delete(&record.id).await.unwrap();
        assert!(repository.find_by_id(&record.id).await.unwrap().is_none());
        assert!(matches!(
            repository.get_by_id(&record.id).await,
            Err(Error::RecordNotFound(_))
        ));
        assert!(matches!(
            repository.update(&record).await,
            Err(Error::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queries() {
        let repository = InMemoryRepository::new();
        repository.save(&record(OutOfBandRole::Sender, "inv-1")).await.unwrap();
        repository.save(&record(OutOfBandRole::Receiver, "inv-1")).await.unwrap();
        repository.save(&record(OutOfBandRole::Receiver, "inv-2")).await.unwrap();

        assert_eq!(repository.get_all().await.unwrap().len(), 3);

        let received = repository
            .find_all_by_query(&OutOfBandQuery::default().role(OutOfBandRole::Receiver))
            .await
            .unwrap();
        assert_eq!(received.len(), 2);

        let single = repository
            .find_single_by_query(
                &OutOfBandQuery::default()
                    .role(OutOfBandRole::Receiver)
                    .invitation_id("inv-2"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(single.state, OutOfBandState::Initial);

        assert!(
            repository
                .find_single_by_query(&OutOfBandQuery::default().invitation_id("inv-1"))
                .await
                .is_err()
        );
    }
}
