//! Validated prerequisite graph.
//!
//! Activities live in an arena indexed by position; prerequisite edges are
//! stored as ids and resolved to arena indices once, at load time. Cycles and
//! dangling references are content-authoring bugs and are detected here,
//! never per child at runtime.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};
use tracing::error;

use super::{Activity, ActivityId, ContentCatalog, Subject, SubjectId};
use crate::achievements::AchievementDefinition;
use crate::error::ContentGraphError;

/// Arena-of-activities DAG with a precomputed topological order.
#[derive(Debug, Clone)]
pub struct ContentGraph {
    subjects: Vec<Subject>,
    activities: Vec<Activity>,
    index: HashMap<ActivityId, usize>,
    subject_index: HashMap<SubjectId, usize>,
    /// Per subject, arena indices in curriculum order.
    ordered: Vec<Vec<usize>>,
    /// Per activity, its position within its subject's curriculum order.
    position: Vec<usize>,
    topo: Vec<usize>,
    quarantined: HashMap<SubjectId, ContentGraphError>,
    achievements: Vec<AchievementDefinition>,
    fingerprint: String,
}

impl ContentGraph {
    /// Build and validate. Any content problem is fatal.
    pub fn build(catalog: ContentCatalog) -> Result<Self, ContentGraphError> {
        let (graph, mut problems) = Self::assemble(catalog);
        if problems.is_empty() {
            Ok(graph)
        } else {
            Err(problems.remove(0))
        }
    }

    /// Build and validate, quarantining subjects touched by a content problem
    /// instead of failing. Unlock resolution for a quarantined subject falls
    /// back to what the child had already unlocked.
    pub fn build_lenient(catalog: ContentCatalog) -> (Self, Vec<ContentGraphError>) {
        let (graph, problems) = Self::assemble(catalog);
        for problem in &problems {
            error!(error = %problem, "content pack problem, affected subject quarantined");
        }
        (graph, problems)
    }

    fn assemble(catalog: ContentCatalog) -> (Self, Vec<ContentGraphError>) {
        let fingerprint = fingerprint(&catalog);
        let mut problems = Vec::new();
        let mut quarantined = HashMap::new();

        let mut subjects = Vec::with_capacity(catalog.subjects.len());
        let mut subject_index = HashMap::new();
        for subject in catalog.subjects {
            if subject_index.contains_key(&subject.id) {
                let err = ContentGraphError::DuplicateId(subject.id.clone());
                flag(&mut quarantined, &subject.id, &err);
                problems.push(err);
                continue;
            }
            subject_index.insert(subject.id.clone(), subjects.len());
            subjects.push(subject);
        }

        let mut activities = Vec::with_capacity(catalog.activities.len());
        let mut index = HashMap::new();
        for activity in catalog.activities {
            if !subject_index.contains_key(&activity.subject) {
                problems.push(ContentGraphError::UnknownSubject {
                    activity: activity.id.clone(),
                    subject: activity.subject.clone(),
                });
                continue;
            }
            if index.contains_key(&activity.id) {
                let err = ContentGraphError::DuplicateId(activity.id.clone());
                flag(&mut quarantined, &activity.subject, &err);
                problems.push(err);
                continue;
            }
            index.insert(activity.id.clone(), activities.len());
            activities.push(activity);
        }

        // Curriculum order: listed sequence first, then the rest as declared.
        let mut ordered = vec![Vec::new(); subjects.len()];
        let mut placed = vec![false; activities.len()];
        for (si, subject) in subjects.iter().enumerate() {
            for id in &subject.sequence {
                match index.get(id) {
                    Some(&ai) if activities[ai].subject == subject.id => {
                        if placed[ai] {
                            let err = ContentGraphError::DuplicateId(id.clone());
                            flag(&mut quarantined, &subject.id, &err);
                            problems.push(err);
                        } else {
                            placed[ai] = true;
                            ordered[si].push(ai);
                        }
                    }
                    _ => {
                        let err = ContentGraphError::UnknownSequenceEntry {
                            subject: subject.id.clone(),
                            activity: id.clone(),
                        };
                        flag(&mut quarantined, &subject.id, &err);
                        problems.push(err);
                    }
                }
            }
        }
        for (ai, activity) in activities.iter().enumerate() {
            if !placed[ai] {
                ordered[subject_index[&activity.subject]].push(ai);
            }
        }
        let mut position = vec![0; activities.len()];
        for list in &ordered {
            for (pos, &ai) in list.iter().enumerate() {
                position[ai] = pos;
            }
        }

        for activity in &activities {
            for prerequisite in &activity.prerequisites {
                if !index.contains_key(prerequisite) {
                    let err = ContentGraphError::DanglingPrerequisite {
                        activity: activity.id.clone(),
                        missing: prerequisite.clone(),
                    };
                    flag(&mut quarantined, &activity.subject, &err);
                    problems.push(err);
                }
            }
        }

        // Kahn's algorithm over prerequisite -> dependant edges.
        let n = activities.len();
        let mut indegree = vec![0usize; n];
        let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (ai, activity) in activities.iter().enumerate() {
            for prerequisite in &activity.prerequisites {
                if let Some(&pi) = index.get(prerequisite) {
                    indegree[ai] += 1;
                    dependants[pi].push(ai);
                }
            }
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut topo = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            topo.push(i);
            for &d in &dependants[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if topo.len() < n {
            let stuck: Vec<usize> = (0..n).filter(|&i| indegree[i] > 0).collect();
            let stuck_set: HashSet<usize> = stuck.iter().copied().collect();
            let err = ContentGraphError::Cycle {
                path: find_cycle(&activities, &index, &stuck_set, stuck[0]),
            };
            let hit: BTreeSet<&str> = stuck
                .iter()
                .map(|&i| activities[i].subject.as_str())
                .collect();
            for subject in hit {
                flag(&mut quarantined, subject, &err);
            }
            problems.push(err);
            topo.extend(stuck);
        }

        let graph = ContentGraph {
            subjects,
            activities,
            index,
            subject_index,
            ordered,
            position,
            topo,
            quarantined,
            achievements: catalog.achievements,
            fingerprint,
        };
        (graph, problems)
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.index.get(id).map(|&i| &self.activities[i])
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.subject_index.get(id).map(|&i| &self.subjects[i])
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    /// Activities of a subject in curriculum order.
    pub fn activities_in_subject<'a>(
        &'a self,
        subject: &str,
    ) -> impl Iterator<Item = &'a Activity> + 'a {
        let list: &[usize] = match self.subject_index.get(subject) {
            Some(&si) => &self.ordered[si],
            None => &[],
        };
        list.iter().map(move |&ai| &self.activities[ai])
    }

    /// Zero-based curriculum position of an activity within its subject.
    pub fn sequence_position(&self, activity: &str) -> Option<usize> {
        self.index.get(activity).map(|&i| self.position[i])
    }

    /// All activities, prerequisites before dependants.
    pub fn topological(&self) -> impl Iterator<Item = &Activity> + '_ {
        self.topo.iter().map(move |&i| &self.activities[i])
    }

    pub fn is_quarantined(&self, subject: &str) -> bool {
        self.quarantined.contains_key(subject)
    }

    pub fn quarantine_reason(&self, subject: &str) -> Option<&ContentGraphError> {
        self.quarantined.get(subject)
    }

    pub fn achievements(&self) -> &[AchievementDefinition] {
        &self.achievements
    }

    pub fn achievement(&self, id: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|a| a.id == id)
    }

    /// SHA-256 of the catalog the graph was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn flag(
    quarantined: &mut HashMap<SubjectId, ContentGraphError>,
    subject: &str,
    err: &ContentGraphError,
) {
    quarantined
        .entry(subject.to_string())
        .or_insert_with(|| err.clone());
}

/// Walk prerequisite edges among stuck nodes until one repeats.
fn find_cycle(
    activities: &[Activity],
    index: &HashMap<ActivityId, usize>,
    stuck: &HashSet<usize>,
    start: usize,
) -> Vec<String> {
    let mut seen: HashMap<usize, usize> = HashMap::new();
    let mut trail = Vec::new();
    let mut current = start;
    loop {
        if let Some(&pos) = seen.get(&current) {
            let mut path: Vec<String> = trail[pos..]
                .iter()
                .map(|&i: &usize| activities[i].id.clone())
                .collect();
            path.push(activities[current].id.clone());
            return path;
        }
        seen.insert(current, trail.len());
        trail.push(current);
        let next = activities[current]
            .prerequisites
            .iter()
            .filter_map(|p| index.get(p).copied())
            .find(|p| stuck.contains(p));
        match next {
            Some(n) => current = n,
            None => return trail.iter().map(|&i| activities[i].id.clone()).collect(),
        }
    }
}

fn fingerprint(catalog: &ContentCatalog) -> String {
    let bytes = serde_json::to_vec(catalog).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn catalog(toml: &str) -> ContentCatalog {
        ContentCatalog::from_toml_str(toml).unwrap()
    }

    const TWO_SUBJECTS: &str = indoc! {r#"
        [[subjects]]
        id = "math"
        name = "Mathematics"
        sequence = ["m1", "m2"]

        [[subjects]]
        id = "words"
        name = "Words"

        [[activities]]
        id = "m2"
        subject = "math"
        tier = "easy"
        prerequisites = ["m1"]

        [[activities]]
        id = "m1"
        subject = "math"
        tier = "easy"

        [[activities]]
        id = "m3"
        subject = "math"
        tier = "medium"
        prerequisites = ["m2"]

        [[activities]]
        id = "w1"
        subject = "words"
        tier = "easy"
    "#};

    #[test]
    fn builtin_pack_is_a_valid_dag() {
        let graph = ContentGraph::build(ContentCatalog::builtin().unwrap()).unwrap();
        assert!(graph.subjects().iter().all(|s| !graph.is_quarantined(&s.id)));
    }

    #[test]
    fn sequence_orders_listed_then_declared() {
        let graph = ContentGraph::build(catalog(TWO_SUBJECTS)).unwrap();
        let ids: Vec<&str> = graph
            .activities_in_subject("math")
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(graph.sequence_position("m3"), Some(2));
        assert_eq!(graph.activities_in_subject("nope").count(), 0);
    }

    #[test]
    fn topological_order_puts_prerequisites_first() {
        let graph = ContentGraph::build(catalog(TWO_SUBJECTS)).unwrap();
        let order: Vec<&str> = graph.topological().map(|a| a.id.as_str()).collect();
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        assert!(pos("m1") < pos("m2"));
        assert!(pos("m2") < pos("m3"));
    }

    #[test]
    fn cycle_is_rejected_when_strict() {
        let toml = TWO_SUBJECTS.replace(
            "id = \"m1\"\nsubject = \"math\"\ntier = \"easy\"",
            "id = \"m1\"\nsubject = \"math\"\ntier = \"easy\"\nprerequisites = [\"m3\"]",
        );
        let err = ContentGraph::build(catalog(&toml)).unwrap_err();
        match err {
            ContentGraphError::Cycle { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"m1".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn lenient_build_quarantines_only_affected_subject() {
        let toml = TWO_SUBJECTS.replace(
            "id = \"m1\"\nsubject = \"math\"\ntier = \"easy\"",
            "id = \"m1\"\nsubject = \"math\"\ntier = \"easy\"\nprerequisites = [\"m3\"]",
        );
        let (graph, problems) = ContentGraph::build_lenient(catalog(&toml));
        assert_eq!(problems.len(), 1);
        assert!(graph.is_quarantined("math"));
        assert!(!graph.is_quarantined("words"));
        assert_eq!(graph.topological().count(), 4);
    }

    #[test]
    fn dangling_prerequisite_is_reported() {
        let toml = TWO_SUBJECTS.replace("prerequisites = [\"m2\"]", "prerequisites = [\"ghost\"]");
        let err = ContentGraph::build(catalog(&toml)).unwrap_err();
        assert_eq!(
            err,
            ContentGraphError::DanglingPrerequisite {
                activity: "m3".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn unknown_sequence_entry_is_reported() {
        let toml = TWO_SUBJECTS.replace("sequence = [\"m1\", \"m2\"]", "sequence = [\"m1\", \"zz\"]");
        let (graph, problems) = ContentGraph::build_lenient(catalog(&toml));
        assert!(matches!(
            problems[0],
            ContentGraphError::UnknownSequenceEntry { .. }
        ));
        assert!(graph.is_quarantined("math"));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = ContentGraph::build(catalog(TWO_SUBJECTS)).unwrap();
        let b = ContentGraph::build(catalog(&TWO_SUBJECTS.replace("Words", "Letters"))).unwrap();
        assert_eq!(a.fingerprint().len(), 64);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
