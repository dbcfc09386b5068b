//! Session state machine.
//!
//! A session walks every asset of a device through the catalog's trees in
//! order. It is either awaiting an answer (`finished == false`, position
//! resolves to a live node) or finished, after which no transition is
//! accepted.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use tracing::info;

use crate::catalog::{Catalog, Node, Target, Tree};
use crate::device::{Asset, Device};
use crate::error::EngineError;
use crate::position::Position;
use crate::resolver::next_eligible_tree;
use crate::results::ResultStore;

/// Payload describing the question a session is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionPayload {
    pub finished: bool,
    pub device_name: String,
    pub asset_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<usize>,
    pub tree_id: String,
    pub title: String,
    pub question: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload returned once every asset has been evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalPayload {
    pub finished: bool,
    pub final_results: ResultStore,
}

/// What a transition produced: the next question or the final results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Step {
    Question(QuestionPayload),
    Finished(FinalPayload),
}

impl Step {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn question(&self) -> Option<&QuestionPayload> {
        match self {
            Self::Question(q) => Some(q),
            Self::Finished(_) => None,
        }
    }
}

/// Serialized form of a session, used by export and import.
///
/// Every field is required on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session_id: String,
    pub device: Device,
    pub position: Position,
    pub results: ResultStore,
    pub finished: bool,
}

/// The full evaluation state for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub device: Device,
    pub position: Position,
    pub results: ResultStore,
    pub finished: bool,
}

/// Resolved references for the current position.
struct Cursor<'a> {
    asset: &'a Asset,
    tree: &'a Tree,
    node: &'a Node,
}

impl Session {
    /// Start a session at the root of the first tree for the first asset.
    pub fn start(
        session_id: impl Into<String>,
        device: Device,
        catalog: &Catalog,
    ) -> Result<Self, EngineError> {
        let first_asset_id = device
            .asset(0)
            .map(|a| a.id.clone())
            .ok_or_else(|| EngineError::InvalidInput("no assets found in device".into()))?;
        let first_tree = catalog
            .tree(0)
            .ok_or_else(|| EngineError::InvalidState("catalog has no trees".into()))?;

        let mut results = ResultStore::new();
        results.bucket_mut(&first_asset_id);

        let session = Self {
            session_id: session_id.into(),
            device,
            position: Position::new(0, 0, first_tree.root.clone()),
            results,
            finished: false,
        };
        info!(
            session_id = %session.session_id,
            device = %session.device.device_name,
            assets = session.device.asset_count(),
            "session started"
        );
        Ok(session)
    }

    /// Rebuild a session from an exported document.
    ///
    /// The document is validated in full; the returned session is only
    /// produced if its position resolves (or it is finished). Every failure
    /// is the document's fault and reported as `InvalidInput`.
    pub fn restore(doc: SessionDocument, catalog: &Catalog) -> Result<Self, EngineError> {
        if doc.session_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("session_id is empty".into()));
        }
        doc.device.validate()?;
        if doc.position.current_asset_index >= doc.device.asset_count() {
            return Err(EngineError::InvalidInput(format!(
                "asset index {} out of range ({} assets)",
                doc.position.current_asset_index,
                doc.device.asset_count()
            )));
        }

        let session = Self {
            session_id: doc.session_id,
            device: doc.device,
            position: doc.position,
            results: doc.results,
            finished: doc.finished,
        };
        if !session.finished {
            session.cursor(catalog).map_err(|e| {
                EngineError::InvalidInput(format!("position does not resolve: {}", e))
            })?;
        }
        Ok(session)
    }

    pub fn to_document(&self) -> SessionDocument {
        SessionDocument {
            session_id: self.session_id.clone(),
            device: self.device.clone(),
            position: self.position.clone(),
            results: self.results.clone(),
            finished: self.finished,
        }
    }

    fn cursor<'a>(&'a self, catalog: &'a Catalog) -> Result<Cursor<'a>, EngineError> {
        let pos = &self.position;
        let asset = self.device.asset(pos.current_asset_index).ok_or_else(|| {
            EngineError::InvalidState(format!("asset index {} does not resolve", pos.current_asset_index))
        })?;
        let tree = catalog.tree(pos.current_tree_index).ok_or_else(|| {
            EngineError::InvalidState(format!("tree index {} does not resolve", pos.current_tree_index))
        })?;
        let node = tree.node(&pos.current_node_id).ok_or_else(|| {
            EngineError::CorruptState(format!(
                "node '{}' not found in tree '{}'",
                pos.current_node_id, tree.id
            ))
        })?;
        Ok(Cursor { asset, tree, node })
    }

    fn question(&self, cursor: &Cursor<'_>) -> QuestionPayload {
        QuestionPayload {
            finished: false,
            device_name: self.device.device_name.clone(),
            asset_name: cursor.asset.name.clone(),
            asset_index: None,
            tree_id: cursor.tree.id.clone(),
            title: cursor.tree.title.clone(),
            question: cursor.node.to_value(),
            message: None,
        }
    }

    fn final_payload(&self) -> FinalPayload {
        FinalPayload {
            finished: true,
            final_results: self.results.clone(),
        }
    }

    /// The step implied by the current state, without changing it.
    pub fn current_step(&self, catalog: &Catalog) -> Result<Step, EngineError> {
        if self.finished {
            return Ok(Step::Finished(self.final_payload()));
        }
        let cursor = self.cursor(catalog)?;
        Ok(Step::Question(self.question(&cursor)))
    }

    /// Apply a yes/no answer to the current question.
    pub fn apply_answer(&mut self, catalog: &Catalog, answer: bool) -> Result<Step, EngineError> {
        if self.finished {
            return Err(EngineError::InvalidState(format!(
                "session {} is already finished",
                self.session_id
            )));
        }

        let cursor = self.cursor(catalog)?;
        let asset_index = self.position.current_asset_index;
        let tree_index = self.position.current_tree_index;
        let asset_id = cursor.asset.id.clone();
        let asset_name = cursor.asset.name.clone();
        let tree_id = cursor.tree.id.clone();

        let result_id = match cursor.node.branch(answer) {
            Target::Node(next) => {
                let next = next.clone();
                self.position.current_node_id = next;
                return self.current_step(catalog);
            }
            Target::Outcome(result_id) => result_id.clone(),
        };

        let outcome = catalog
            .outcome(&result_id)
            .cloned()
            .ok_or_else(|| EngineError::CorruptState(format!("result '{}' not in catalog", result_id)))?;

        let bucket = self.results.bucket_mut(&asset_id);
        match bucket.entry(tree_id.clone()) {
            Entry::Vacant(entry) => {
                info!(
                    session_id = %self.session_id,
                    asset_id = %asset_id,
                    tree_id = %tree_id,
                    status = %outcome.status,
                    "tree completed"
                );
                entry.insert(outcome);
            }
            Entry::Occupied(entry) => {
                info!(
                    session_id = %self.session_id,
                    asset_id = %asset_id,
                    tree_id = %tree_id,
                    kept = %entry.get().status,
                    ignored = %outcome.status,
                    "tree already has a result, answer not recorded"
                );
            }
        }

        let next = next_eligible_tree(catalog, Some(tree_index), bucket);
        for skipped in &catalog.trees()[tree_index + 1..next.unwrap_or(catalog.len())] {
            info!(
                session_id = %self.session_id,
                asset_id = %asset_id,
                tree_id = %skipped.id,
                "tree skipped"
            );
        }

        if let Some(next_index) = next {
            let next_tree = catalog
                .tree(next_index)
                .ok_or_else(|| EngineError::CorruptState(format!("tree index {} vanished", next_index)))?;
            self.position.enter_tree(next_index, &next_tree.root);

            let mut step = self.current_step(catalog)?;
            if let Step::Question(q) = &mut step {
                q.message = Some(format!(
                    "Asset {}: completed {}, started {}",
                    asset_name, tree_id, next_tree.id
                ));
            }
            return Ok(step);
        }

        let next_asset_index = asset_index + 1;
        if let Some(next_asset) = self.device.asset(next_asset_index) {
            let next_asset_id = next_asset.id.clone();
            let next_asset_name = next_asset.name.clone();
            let first_tree = catalog
                .tree(0)
                .ok_or_else(|| EngineError::CorruptState("catalog has no trees".into()))?;

            self.position.enter_asset(next_asset_index, &first_tree.root);
            self.results.bucket_mut(&next_asset_id);
            info!(
                session_id = %self.session_id,
                completed = %asset_id,
                next = %next_asset_id,
                "asset completed"
            );

            let mut step = self.current_step(catalog)?;
            if let Step::Question(q) = &mut step {
                q.asset_index = Some(next_asset_index);
                q.message = Some(format!(
                    "Asset {} completed, moving to {}",
                    asset_name, next_asset_name
                ));
            }
            return Ok(step);
        }

        self.finished = true;
        info!(session_id = %self.session_id, "session finished");
        Ok(Step::Finished(self.final_payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Outcome, Status};
    use serde_json::json;

    /// T0 (root q0) and T1 (root q1, depends on T0), single-node trees.
    fn two_tree_catalog() -> Catalog {
        Catalog::from_value(json!({
            "trees": [
                {"id": "T0", "title": "First", "root": "q0",
                 "nodes": {"q0": {"question": "First?", "true": "r_pass", "false": "r_fail"}}},
                {"id": "T1", "title": "Second", "root": "q1", "dependencies": ["T0"],
                 "nodes": {"q1": {"question": "Second?", "true": "r_pass", "false": "r_fail"}}}
            ],
            "results": {"r_pass": {"status": "PASS"}, "r_fail": {"status": "FAIL"}}
        }))
        .unwrap()
    }

    fn device(ids: &[&str]) -> Device {
        Device::new(
            "Router",
            ids.iter().map(|id| Asset::new(*id, format!("asset {}", id))).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_start_positions_at_first_root() {
        let catalog = two_tree_catalog();
        let session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        assert_eq!(session.position, Position::new(0, 0, "q0"));
        assert!(!session.finished);

        let step = session.current_step(&catalog).unwrap();
        let q = step.question().unwrap();
        assert_eq!(q.tree_id, "T0");
        assert_eq!(q.question["question"], "First?");
    }

    #[test]
    fn test_start_with_empty_catalog() {
        let err = Session::start("s1", device(&["A1"]), &Catalog::empty()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_fail_skips_dependent_and_finishes() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();

        let step = session.apply_answer(&catalog, false).unwrap();
        assert!(step.is_finished());
        assert!(session.finished);
        assert_eq!(session.results.get("A1", "T0").unwrap().status, Status::Fail);
        assert_eq!(session.results.get("A1", "T1").unwrap().status, Status::NotApplicable);

        let payload = serde_json::to_value(&step).unwrap();
        assert_eq!(
            payload,
            json!({
                "finished": true,
                "final_results": {"A1": {"T0": {"status": "FAIL"}, "T1": {"status": "NOT_APPLICABLE"}}}
            })
        );
    }

    #[test]
    fn test_pass_moves_to_dependent_tree() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();

        let step = session.apply_answer(&catalog, true).unwrap();
        let q = step.question().unwrap();
        assert_eq!(q.tree_id, "T1");
        assert_eq!(q.message.as_deref(), Some("Asset asset A1: completed T0, started T1"));
        assert_eq!(session.position, Position::new(0, 1, "q1"));
    }

    #[test]
    fn test_inner_node_step_keeps_tree() {
        let catalog = Catalog::from_value(json!({
            "trees": [{"id": "T0", "title": "Deep", "root": "q0", "nodes": {
                "q0": {"true": "q1", "false": "r_fail"},
                "q1": {"true": "r_pass", "false": "r_fail"}
            }}],
            "results": {"r_pass": {"status": "PASS"}, "r_fail": {"status": "FAIL"}}
        }))
        .unwrap();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();

        let step = session.apply_answer(&catalog, true).unwrap();
        assert_eq!(step.question().unwrap().question["id"], "q1");
        assert_eq!(session.position, Position::new(0, 0, "q1"));
        assert!(session.results.bucket("A1").unwrap().is_empty());
    }

    #[test]
    fn test_advances_to_next_asset() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1", "A2"]), &catalog).unwrap();

        let step = session.apply_answer(&catalog, false).unwrap();
        let q = step.question().unwrap();
        assert_eq!(q.asset_name, "asset A2");
        assert_eq!(q.asset_index, Some(1));
        assert_eq!(q.tree_id, "T0");
        assert_eq!(session.position, Position::new(1, 0, "q0"));
        assert!(session.results.bucket("A2").is_some());
    }

    #[test]
    fn test_entering_asset_keeps_partial_results() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1", "A2"]), &catalog).unwrap();
        session.results.record("A2", "T9", Outcome::new(Status::Pass));

        session.apply_answer(&catalog, false).unwrap();
        assert_eq!(session.results.get("A2", "T9").unwrap().status, Status::Pass);
    }

    #[test]
    fn test_finished_session_rejects_answers() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        session.apply_answer(&catalog, false).unwrap();

        let before = session.clone();
        let err = session.apply_answer(&catalog, true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(session, before);
    }

    #[test]
    fn test_stale_node_is_corrupt_state() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        session.position.current_node_id = "gone".into();
        assert!(matches!(
            session.apply_answer(&catalog, true),
            Err(EngineError::CorruptState(_))
        ));
    }

    #[test]
    fn test_stale_tree_is_invalid_state() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        session.position.current_tree_index = 7;
        assert!(matches!(
            session.apply_answer(&catalog, true),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_existing_result_is_not_overwritten() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        session.results.record("A1", "T0", Outcome::new(Status::Pass));

        session.apply_answer(&catalog, false).unwrap();
        assert_eq!(session.results.get("A1", "T0").unwrap().status, Status::Pass);
    }

    #[test]
    fn test_terminates_within_assets_times_trees() {
        let catalog = two_tree_catalog();
        let assets = ["A1", "A2", "A3"];
        for pattern in 0..4u8 {
            let mut session = Session::start("s1", device(&assets), &catalog).unwrap();
            let mut transitions = 0;
            while !session.finished {
                let answer = (pattern & (1 << (transitions % 2))) != 0;
                session.apply_answer(&catalog, answer).unwrap();
                transitions += 1;
                assert!(transitions <= assets.len() * catalog.len());
            }
            for asset in assets {
                assert_eq!(session.results.bucket(asset).unwrap().len(), catalog.len());
            }
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1", "A2"]), &catalog).unwrap();
        session.apply_answer(&catalog, true).unwrap();

        let json = serde_json::to_string(&session.to_document()).unwrap();
        let doc: SessionDocument = serde_json::from_str(&json).unwrap();
        let restored = Session::restore(doc, &catalog).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_restore_rejects_asset_out_of_range() {
        let catalog = two_tree_catalog();
        let session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        let mut doc = session.to_document();
        doc.position.current_asset_index = 3;
        assert!(matches!(
            Session::restore(doc, &catalog),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_restore_rejects_unresolvable_position() {
        let catalog = two_tree_catalog();
        let session = Session::start("s1", device(&["A1"]), &catalog).unwrap();

        let mut doc = session.to_document();
        doc.position.current_node_id = "nope".into();
        assert!(matches!(
            Session::restore(doc, &catalog),
            Err(EngineError::InvalidInput(_))
        ));

        let mut doc = session.to_document();
        doc.position.current_tree_index = 7;
        assert!(matches!(
            Session::restore(doc, &catalog),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_restore_rejects_duplicate_asset_ids() {
        let catalog = two_tree_catalog();
        let session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        let mut doc = session.to_document();
        doc.device.device_assets.push(Asset::new("A1", "again"));
        assert!(matches!(
            Session::restore(doc, &catalog),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_restore_finished_skips_position_check() {
        let catalog = two_tree_catalog();
        let mut session = Session::start("s1", device(&["A1"]), &catalog).unwrap();
        session.apply_answer(&catalog, false).unwrap();
        let mut doc = session.to_document();
        doc.position.current_node_id = "whatever".into();

        let restored = Session::restore(doc, &catalog).unwrap();
        assert!(restored.current_step(&catalog).unwrap().is_finished());
    }

    #[test]
    fn test_document_requires_all_fields() {
        let raw = json!({
            "session_id": "s1",
            "device": {"device_name": "Router", "device_assets": [{"id": "A1", "name": "a"}]},
            "position": {"current_asset_index": 0, "current_tree_index": 0, "current_node_id": "q0"},
            "results": {}
        });
        assert!(serde_json::from_value::<SessionDocument>(raw).is_err());
    }
}
