use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of work a task performs. Producers agree on this vocabulary; the
/// scheduler never looks past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskType {
    /// Garbage-collector work (marking helpers, card-table maintenance).
    Gc = 0,
    /// JIT/AOT compilation requests.
    Jit = 1,
    /// Profile persistence.
    ProfileSaver = 2,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::Gc, TaskType::Jit, TaskType::ProfileSaver];

    fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == raw)
    }
}

/// Object model the task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VMType {
    StaticVm = 0,
    DynamicVm = 1,
}

impl VMType {
    pub const ALL: [VMType; 2] = [VMType::StaticVm, VMType::DynamicVm];

    fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| *v as u8 == raw)
    }
}

/// Urgency tier of a task inside its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskExecutionMode {
    /// Latency-sensitive; always dequeued before background work of the same queue.
    Foreground = 0,
    /// Best-effort.
    Background = 1,
}

impl TaskExecutionMode {
    pub const ALL: [TaskExecutionMode; 2] =
        [TaskExecutionMode::Foreground, TaskExecutionMode::Background];
}

// ── TaskProperties ──────────────────────────────────────────────────

/// Number of distinct [`TaskProperties`] values.
pub const TASK_PROPERTIES_COUNT: usize =
    TaskType::ALL.len() * VMType::ALL.len() * TaskExecutionMode::ALL.len();

/// Immutable classification of a task.
///
/// Ordering and hashing follow the packed key `(type, vm, mode)`, so the
/// triple can key ordered and hashed maps alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskProperties {
    task_type: TaskType,
    vm_type: VMType,
    mode: TaskExecutionMode,
}

impl TaskProperties {
    pub const fn new(task_type: TaskType, vm_type: VMType, mode: TaskExecutionMode) -> Self {
        Self {
            task_type,
            vm_type,
            mode,
        }
    }

    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub const fn vm_type(&self) -> VMType {
        self.vm_type
    }

    pub const fn execution_mode(&self) -> TaskExecutionMode {
        self.mode
    }

    /// Packed comparable key.
    pub const fn key(&self) -> u8 {
        ((self.task_type as u8) << 2) | ((self.vm_type as u8) << 1) | self.mode as u8
    }

    /// Dense index in `0..TASK_PROPERTIES_COUNT`, used by counter tables.
    pub const fn index(&self) -> usize {
        ((self.task_type as usize * VMType::ALL.len()) + self.vm_type as usize)
            * TaskExecutionMode::ALL.len()
            + self.mode as usize
    }

    /// Id of the queue that accepts tasks with these properties.
    pub const fn queue_id(&self) -> TaskQueueId {
        TaskQueueId::new(self.task_type, self.vm_type)
    }

    /// Every classification, in key order.
    pub fn all() -> impl Iterator<Item = TaskProperties> {
        TaskType::ALL.into_iter().flat_map(|t| {
            VMType::ALL.into_iter().flat_map(move |v| {
                TaskExecutionMode::ALL
                    .into_iter()
                    .map(move |m| TaskProperties::new(t, v, m))
            })
        })
    }
}

impl fmt::Display for TaskProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/{:?}", self.task_type, self.vm_type, self.mode)
    }
}

// ── TaskQueueId ─────────────────────────────────────────────────────

/// Packed `(TaskType, VMType)` key identifying a registered queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskQueueId(u16);

impl TaskQueueId {
    /// Reserved sentinel; no real `(TaskType, VMType)` pair packs to it.
    pub const INVALID: TaskQueueId = TaskQueueId(u16::MAX);

    pub const fn new(task_type: TaskType, vm_type: VMType) -> Self {
        Self(((task_type as u16) << 8) | vm_type as u16)
    }

    pub fn task_type(&self) -> Option<TaskType> {
        TaskType::from_raw((self.0 >> 8) as u8)
    }

    pub fn vm_type(&self) -> Option<VMType> {
        VMType::from_raw((self.0 & 0xff) as u8)
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for TaskQueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.task_type(), self.vm_type()) {
            (Some(t), Some(v)) => write!(f, "{t:?}/{v:?}"),
            _ => write!(f, "invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn index_is_dense_and_unique() {
        let indices: HashSet<usize> = TaskProperties::all().map(|p| p.index()).collect();
        assert_eq!(indices.len(), TASK_PROPERTIES_COUNT);
        assert!(indices.iter().all(|i| *i < TASK_PROPERTIES_COUNT));
    }

    #[test]
    fn ordering_follows_packed_key() {
        let all: Vec<TaskProperties> = TaskProperties::all().collect();
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].key() < pair[1].key());
        }
    }

    #[test]
    fn queue_id_round_trips_its_parts() {
        let id = TaskQueueId::new(TaskType::ProfileSaver, VMType::DynamicVm);
        assert_eq!(id.task_type(), Some(TaskType::ProfileSaver));
        assert_eq!(id.vm_type(), Some(VMType::DynamicVm));
        assert!(id.is_valid());
    }

    #[test]
    fn invalid_queue_id_is_distinct() {
        for t in TaskType::ALL {
            for v in VMType::ALL {
                assert_ne!(TaskQueueId::new(t, v), TaskQueueId::INVALID);
            }
        }
        assert_eq!(TaskQueueId::INVALID.task_type(), None);
        assert_eq!(TaskQueueId::INVALID.to_string(), "invalid");
    }

    #[test]
    fn properties_map_to_their_queue() {
        let props = TaskProperties::new(TaskType::Jit, VMType::StaticVm, TaskExecutionMode::Background);
        assert_eq!(props.queue_id(), TaskQueueId::new(TaskType::Jit, VMType::StaticVm));
    }

    #[test]
    fn serde_uses_snake_case() {
        let props = TaskProperties::new(TaskType::ProfileSaver, VMType::StaticVm, TaskExecutionMode::Foreground);
        let json = serde_json::to_string(&props).unwrap();
        assert!(json.contains("\"profile_saver\""));
        assert!(json.contains("\"static_vm\""));
    }
}
