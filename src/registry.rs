use super::{
    errors::WorkError,
    handle::{WorkContext, WorkFn, WorkItem},
};
use std::{collections::HashMap, fmt, sync::Arc};


/// Таблица рабочих функций по паре `(group, name)`.
///
/// Заполняется до создания пула, после этого только читается.
#[derive(Clone, Default)]
pub struct Registry {
    groups: HashMap<String, HashMap<String, WorkFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Повторная регистрация той же пары заменяет функцию
    pub fn register<F>(&mut self, group: impl Into<String>, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&WorkItem, &WorkContext) -> Result<(), WorkError> + Send + Sync + 'static,
    {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(name.into(), Arc::new(function));
        self
    }

    pub fn with<F>(mut self, group: impl Into<String>, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&WorkItem, &WorkContext) -> Result<(), WorkError> + Send + Sync + 'static,
    {
        self.register(group, name, function);
        self
    }

    pub fn get(&self, group: &str, name: &str) -> Option<WorkFn> {
        self.groups.get(group)?.get(name).cloned()
    }

    pub fn contains(&self, group: &str, name: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|functions| functions.contains_key(name))
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .groups
            .iter()
            .flat_map(|(group, functions)| functions.keys().map(move |name| format!("{group}::{name}")))
            .collect();
        names.sort();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}
