use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::task::Task;

pub const DEFAULT_ITEMS_PER_PAGE: u32 =
  10;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Completed
}

impl StatusFilter {
  pub fn matches(
    self,
    task: &Task
  ) -> bool {
    match self {
      | StatusFilter::All => true,
      | StatusFilter::Active => {
        !task.completed
      }
      | StatusFilter::Completed => {
        task.completed
      }
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | StatusFilter::All => "all",
      | StatusFilter::Active => "active",
      | StatusFilter::Completed => {
        "completed"
      }
    }
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(Self::All),
      | "active" | "pending" => {
        Ok(Self::Active)
      }
      | "completed" | "done" => {
        Ok(Self::Completed)
      }
      | other => {
        Err(anyhow!(
          "unknown status filter: \
           {other}"
        ))
      }
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  #[default]
  Newest,
  Oldest
}

impl SortOrder {
  pub fn as_str(self) -> &'static str {
    match self {
      | SortOrder::Newest => "newest",
      | SortOrder::Oldest => "oldest"
    }
  }
}

impl FromStr for SortOrder {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "newest" | "desc" => {
        Ok(Self::Newest)
      }
      | "oldest" | "asc" => {
        Ok(Self::Oldest)
      }
      | other => {
        Err(anyhow!(
          "unknown sort order: {other}"
        ))
      }
    }
  }
}

/// Where the page slice is cut.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Paging {
  /// The collection is complete;
  /// slice it here.
  Client,
  /// The gateway already returned
  /// only the requested page.
  Server
}

#[derive(
  Debug, Clone, PartialEq, Eq,
)]
pub struct ViewSettings {
  pub status:         StatusFilter,
  pub sort_order:     SortOrder,
  pub current_page:   u32,
  pub items_per_page: u32
}

impl Default for ViewSettings {
  fn default() -> Self {
    Self {
      status:         StatusFilter::All,
      sort_order:     SortOrder::Newest,
      current_page:   1,
      items_per_page:
        DEFAULT_ITEMS_PER_PAGE
    }
  }
}

impl ViewSettings {
  pub fn set_status(
    &mut self,
    status: StatusFilter
  ) {
    self.status = status;
    self.current_page = 1;
  }

  pub fn set_sort_order(
    &mut self,
    order: SortOrder
  ) {
    self.sort_order = order;
  }

  pub fn set_items_per_page(
    &mut self,
    items_per_page: u32
  ) {
    self.items_per_page =
      items_per_page.max(1);
    self.current_page = 1;
  }

  pub fn set_page(
    &mut self,
    page: u32
  ) {
    self.current_page = page.max(1);
  }
}

/// Filtered, sorted and (for
/// client paging) sliced projection
/// of `tasks`. Pure.
#[tracing::instrument(skip(
  tasks, settings
))]
pub fn derive_view(
  tasks: &[Task],
  settings: &ViewSettings,
  paging: Paging
) -> Vec<Task> {
  let mut out =
    filter_tasks(tasks, settings.status);
  sort_tasks(
    &mut out,
    settings.sort_order
  );

  let out = match paging {
    | Paging::Client => {
      paginate(
        &out,
        settings.current_page,
        settings.items_per_page
      )
    }
    | Paging::Server => out
  };

  trace!(
    input = tasks.len(),
    output = out.len(),
    "derived view"
  );
  out
}

pub fn filter_tasks(
  tasks: &[Task],
  status: StatusFilter
) -> Vec<Task> {
  tasks
    .iter()
    .filter(|task| status.matches(task))
    .cloned()
    .collect()
}

/// Stable sort by recency.
/// Timestamps are only used when every
/// task carries one; otherwise ids are
/// the key, so the order stays total.
pub fn sort_tasks(
  tasks: &mut [Task],
  order: SortOrder
) {
  let by_timestamp = !tasks.is_empty()
    && tasks
      .iter()
      .all(|t| t.created_at.is_some());

  tasks.sort_by(|a, b| {
    let ord = if by_timestamp {
      a.created_at.cmp(&b.created_at)
    } else {
      a.id.cmp(&b.id)
    };
    apply_order(ord, order)
  });
}

fn apply_order(
  ord: Ordering,
  order: SortOrder
) -> Ordering {
  match order {
    | SortOrder::Oldest => ord,
    | SortOrder::Newest => ord.reverse()
  }
}

pub fn paginate(
  tasks: &[Task],
  current_page: u32,
  items_per_page: u32
) -> Vec<Task> {
  let per_page =
    items_per_page.max(1) as usize;
  let start = (current_page.max(1)
    as usize
    - 1)
  .saturating_mul(per_page);

  tasks
    .iter()
    .skip(start)
    .take(per_page)
    .cloned()
    .collect()
}

pub fn total_pages(
  total_items: u64,
  items_per_page: u32
) -> u32 {
  let per_page =
    u64::from(items_per_page.max(1));
  u32::try_from(
    total_items.div_ceil(per_page)
  )
  .unwrap_or(u32::MAX)
}
