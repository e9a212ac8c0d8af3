//! Built-in task list used when tasks come from the database source.

use crate::recording::schema::{Task, TaskSource};
use std::sync::atomic::{AtomicUsize, Ordering};

const BUILTIN_TASKS: &[&str] = &[
    "Search for a pair of running shoes under $100 and open the first result",
    "Sign in with the test account and open the account settings page",
    "Subscribe to the newsletter using a throwaway email address",
    "Find the store opening hours on the contact page",
    "Add two different items to the cart and open the cart",
    "Change the site language and go back to the home page",
    "Filter the product list by the highest rating",
    "Open the second page of search results for 'rust async'",
];

/// Hands out catalog tasks in order, wrapping around at the end.
pub struct TaskCatalog {
    descriptions: Vec<String>,
    cursor: AtomicUsize,
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::new(BUILTIN_TASKS.iter().map(|s| s.to_string()).collect())
    }
}

impl TaskCatalog {
    pub fn new(descriptions: Vec<String>) -> Self {
        Self {
            descriptions,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// Next task, or `None` for an empty catalog.
    pub fn next_task(&self) -> Option<Task> {
        if self.descriptions.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.descriptions.len();
        Some(Task::new(self.descriptions[index].clone(), TaskSource::Database))
    }
}
