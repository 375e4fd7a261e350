//! Record save followed by many-to-many commits, run as a resumable saga.
//!
//! Steps run strictly in order: validate, write the record, commit each
//! relation's far ids (full replace), refresh from the server. Completed
//! steps are logged; after a failure [`SaveSaga::resume`] continues at the
//! first step that has not completed. Nothing is rolled back.

use crate::api::{ApiError, JunctionApi, JunctionSelection, RecordApi, Row, SchemaProvider};
use crate::graph::JunctionRelation;
use crate::schema::DatabaseSchema;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStep {
    Validate,
    WriteRecord,
    /// Keyed by [`JunctionRelation::key`].
    CommitRelation(String),
    Refresh,
}

impl fmt::Display for SaveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validate => write!(f, "validation"),
            Self::WriteRecord => write!(f, "record write"),
            Self::CommitRelation(key) => write!(f, "relation commit {}", key),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },
    #[error("{step} failed: {source}")]
    Step {
        step: SaveStep,
        #[source]
        source: ApiError,
        completed: Vec<SaveStep>,
    },
    /// Relation commits that failed, keyed by relation. The others went
    /// through and are in `completed`.
    #[error("Record saved but {} relation commit(s) failed", .failures.len())]
    Relations {
        failures: Vec<(String, ApiError)>,
        completed: Vec<SaveStep>,
    },
}

#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub db: String,
    pub table: String,
    pub values: Row,
    /// Key of the record being edited; `None` creates a new one.
    pub existing_pk: Option<Row>,
    pub relations: Vec<JunctionRelation>,
    /// Desired far ids per relation key. Relations without an entry are
    /// left untouched.
    pub far_ids: IndexMap<String, Vec<Value>>,
}

/// Server state after a save.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub pk: Row,
    pub schema: DatabaseSchema,
    pub record: Option<Row>,
    pub selections: IndexMap<String, Vec<Value>>,
}

pub struct SaveSaga {
    request: SaveRequest,
    pk_columns: Vec<String>,
    required: Vec<String>,
    completed: Vec<SaveStep>,
    pk: Option<Row>,
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

impl SaveSaga {
    pub fn new(schema: &DatabaseSchema, request: SaveRequest) -> Self {
        let pk_columns = schema.primary_key_of(&request.table).to_vec();
        let required = schema
            .required_on_create(&request.table)
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            request,
            pk_columns,
            required,
            completed: Vec::new(),
            pk: None,
        }
    }

    pub fn completed(&self) -> &[SaveStep] {
        &self.completed
    }

    pub fn is_done(&self, step: &SaveStep) -> bool {
        self.completed.contains(step)
    }

    fn mark(&mut self, step: SaveStep) {
        info!(table = %self.request.table, %step, "save step completed");
        self.completed.push(step);
    }

    fn is_create(&self) -> bool {
        self.request.existing_pk.is_none()
    }

    fn validate(&self) -> Result<(), SaveError> {
        if !self.is_create() {
            return Ok(());
        }
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|col| is_blank(self.request.values.get(col.as_str())))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SaveError::Validation { missing })
        }
    }

    /// Key present in the submitted values, if every key column is there.
    fn local_pk(&self) -> Option<Row> {
        if let Some(pk) = &self.request.existing_pk {
            return Some(pk.clone());
        }
        if self.pk_columns.is_empty() {
            return None;
        }
        let mut pk = Row::new();
        for col in &self.pk_columns {
            let value = self.request.values.get(col).filter(|v| !is_blank(Some(*v)))?;
            pk.insert(col.clone(), value.clone());
        }
        Some(pk)
    }

    async fn write_record<R: RecordApi + ?Sized>(&mut self, records: &R) -> Result<(), SaveError> {
        let req = &self.request;
        let result = match &req.existing_pk {
            Some(pk) => {
                let values: Row = req
                    .values
                    .iter()
                    .filter(|(col, _)| !self.pk_columns.contains(*col))
                    .map(|(col, v)| (col.clone(), v.clone()))
                    .collect();
                records.update(&req.db, &req.table, pk, &values).await
            }
            None => records.create(&req.db, &req.table, &req.values).await,
        }
        .map_err(|source| SaveError::Step {
            step: SaveStep::WriteRecord,
            source,
            completed: self.completed.clone(),
        })?;

        self.pk = result
            .primary_key
            .filter(|pk| !pk.is_empty())
            .or_else(|| self.local_pk());
        Ok(())
    }

    fn selection(&self, relation: &JunctionRelation) -> Option<JunctionSelection> {
        let main_id = self.pk.as_ref()?.get(&relation.main_ref_column)?;
        Some(JunctionSelection {
            junction_table: relation.junction_table.clone(),
            main_fk_column: relation.main_fk_column.clone(),
            main_id: main_id.clone(),
            far_fk_column: relation.far_fk_column.clone(),
        })
    }

    async fn commit_relations<J: JunctionApi + ?Sized>(
        &mut self,
        junctions: &J,
    ) -> Result<(), SaveError> {
        let mut failures = Vec::new();
        let relations = self.request.relations.clone();

        for relation in &relations {
            let step = SaveStep::CommitRelation(relation.key.clone());
            if self.is_done(&step) {
                continue;
            }
            let Some(far_ids) = self.request.far_ids.get(&relation.key).cloned() else {
                continue;
            };
            let Some(selection) = self.selection(relation) else {
                warn!(relation = %relation.key, "no main id after save, relation not committed");
                continue;
            };

            match junctions.apply_selection(&selection, &far_ids).await {
                Ok(()) => self.mark(step),
                Err(err) => {
                    warn!(relation = %relation.key, error = %err, "relation commit failed");
                    failures.push((relation.key.clone(), err));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SaveError::Relations {
                failures,
                completed: self.completed.clone(),
            })
        }
    }

    async fn refresh<S, R, J>(
        &self,
        schemas: &S,
        records: &R,
        junctions: &J,
    ) -> Result<SaveOutcome, SaveError>
    where
        S: SchemaProvider + ?Sized,
        R: RecordApi + ?Sized,
        J: JunctionApi + ?Sized,
    {
        let req = &self.request;
        let step_err = |source| SaveError::Step {
            step: SaveStep::Refresh,
            source,
            completed: self.completed.clone(),
        };

        let schema = schemas.schema(&req.db).await.map_err(step_err)?;
        let pk = self.pk.clone().unwrap_or_default();
        let record = if pk.is_empty() {
            None
        } else {
            records.get(&req.db, &req.table, &pk).await.map_err(step_err)?
        };

        let mut selections = IndexMap::new();
        for relation in &req.relations {
            if let Some(selection) = self.selection(relation) {
                let ids = junctions.get_selection(&selection).await.map_err(step_err)?;
                selections.insert(relation.key.clone(), ids);
            }
        }

        Ok(SaveOutcome {
            pk,
            schema,
            record,
            selections,
        })
    }

    /// Run every step that has not completed yet.
    pub async fn run<S, R, J>(
        &mut self,
        schemas: &S,
        records: &R,
        junctions: &J,
    ) -> Result<SaveOutcome, SaveError>
    where
        S: SchemaProvider + ?Sized,
        R: RecordApi + ?Sized,
        J: JunctionApi + ?Sized,
    {
        if !self.is_done(&SaveStep::Validate) {
            self.validate()?;
            self.mark(SaveStep::Validate);
        }

        if !self.is_done(&SaveStep::WriteRecord) {
            self.write_record(records).await?;
            self.mark(SaveStep::WriteRecord);
        }

        self.commit_relations(junctions).await?;

        let outcome = self.refresh(schemas, records, junctions).await?;
        if !self.is_done(&SaveStep::Refresh) {
            self.mark(SaveStep::Refresh);
        }
        Ok(outcome)
    }

    /// Retry after a failed [`run`](Self::run). Completed steps are
    /// skipped, so the record is not written again.
    pub async fn resume<S, R, J>(
        &mut self,
        schemas: &S,
        records: &R,
        junctions: &J,
    ) -> Result<SaveOutcome, SaveError>
    where
        S: SchemaProvider + ?Sized,
        R: RecordApi + ?Sized,
        J: JunctionApi + ?Sized,
    {
        info!(
            table = %self.request.table,
            completed = self.completed.len(),
            "resuming save"
        );
        self.run(schemas, records, junctions).await
    }
}
