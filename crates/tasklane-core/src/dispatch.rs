use std::sync::Arc;

use anyhow::{
  Context,
  bail
};
use tracing::{
  debug,
  info,
  instrument
};

use crate::auth::{
  AuthClient,
  AuthSession,
  Login,
  PasswordChange,
  Registration
};
use crate::cli::{
  Command,
  ThemeAction
};
use crate::commands::TaskCommands;
use crate::config::{
  Backend,
  Config
};
use crate::gateway::{
  Gateway,
  GatewayMode,
  LocalGateway,
  RemoteGateway
};
use crate::http::ApiClient;
use crate::render::Renderer;
use crate::storage::KeyValueStore;
use crate::store::TaskStore;
use crate::task::TaskId;
use crate::theme::{
  ThemeState,
  system_theme
};
use crate::view::{
  SortOrder,
  StatusFilter
};

#[instrument(skip_all)]
pub async fn dispatch(
  cfg: &Config,
  storage: Arc<dyn KeyValueStore>,
  command: Command
) -> anyhow::Result<()> {
  let system = system_theme(
    cfg.get("theme.system").as_deref(),
    std::env::var("COLORFGBG")
      .ok()
      .as_deref()
  );
  let mut theme = ThemeState::resolve(
    storage.clone(),
    system
  );
  let renderer =
    Renderer::new(cfg, theme.current())?;
  let session = Arc::new(
    AuthSession::new(storage.clone())
  );

  debug!(?command, "dispatching command");

  match command {
    | Command::Theme {
      action
    } => cmd_theme(&mut theme, action),
    | Command::Login {
      email,
      password
    } => {
      let auth =
        auth_client(cfg, &session)?;
      let user = auth
        .login(&Login {
          email,
          password
        })
        .await?;
      println!(
        "Logged in as {}.",
        user.email
      );
      Ok(())
    }
    | Command::Register {
      email,
      password,
      age
    } => {
      let auth =
        auth_client(cfg, &session)?;
      let user = auth
        .register(&Registration {
          email,
          password,
          age
        })
        .await?;
      println!(
        "Registered {} (id {}).",
        user.email, user.id
      );
      Ok(())
    }
    | Command::Passwd {
      old_password,
      new_password
    } => {
      let auth =
        auth_client(cfg, &session)?;
      auth
        .change_password(
          &PasswordChange {
            old_password,
            new_password
          }
        )
        .await?;
      println!("Password changed.");
      Ok(())
    }
    | Command::Logout => {
      session.logout();
      println!("Logged out.");
      Ok(())
    }
    | Command::Whoami => {
      if !session.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
      }
      let auth =
        auth_client(cfg, &session)?;
      let user = auth.profile().await?;
      println!(
        "{} (id {})",
        user.email, user.id
      );
      Ok(())
    }
    | task_command => {
      let gateway = build_gateway(
        cfg,
        storage,
        session
      )?;
      let store = Arc::new(
        TaskStore::new(
          gateway,
          cfg.view_settings()?
        )
      );
      let commands =
        TaskCommands::new(store);
      run_task_command(
        &commands,
        &renderer,
        task_command
      )
      .await
    }
  }
}

#[instrument(skip(
  commands, renderer
))]
async fn run_task_command(
  commands: &TaskCommands,
  renderer: &Renderer,
  command: Command
) -> anyhow::Result<()> {
  match command {
    | Command::List {
      status,
      sort,
      page,
      limit
    } => {
      cmd_list(
        commands, renderer, status,
        sort, page, limit
      )
      .await
    }
    | Command::Add {
      text
    } => {
      commands.load().await?;
      let task = commands
        .add(&text.join(" "))
        .await?;
      info!(id = task.id, "command add");
      println!(
        "Created task {}.",
        task.id
      );
      Ok(())
    }
    | Command::Edit {
      id,
      text
    } => {
      locate(commands, id).await?;
      match commands
        .edit(id, &text.join(" "))
        .await?
      {
        | Some(task) => {
          println!(
            "Modified task {}.",
            task.id
          )
        }
        | None => {
          bail!("No task with id {id}.")
        }
      }
      Ok(())
    }
    | Command::Toggle {
      id
    } => {
      locate(commands, id).await?;
      match commands.toggle(id).await? {
        | Some(task) if task.completed => {
          println!(
            "Completed task {}.",
            task.id
          )
        }
        | Some(task) => {
          println!(
            "Reopened task {}.",
            task.id
          )
        }
        | None => {
          bail!("No task with id {id}.")
        }
      }
      Ok(())
    }
    | Command::Delete {
      id
    } => {
      locate(commands, id).await?;
      if !commands.delete(id).await? {
        bail!("No task with id {id}.");
      }
      println!("Deleted task {id}.");
      Ok(())
    }
    | other => {
      bail!(
        "not a task command: {other:?}"
      )
    }
  }
}

async fn cmd_list(
  commands: &TaskCommands,
  renderer: &Renderer,
  status: Option<StatusFilter>,
  sort: Option<SortOrder>,
  page: Option<u32>,
  limit: Option<u32>
) -> anyhow::Result<()> {
  let store = commands.store();

  // Filter and page size reset the page, so the page goes last.
  if let Some(status) = status {
    store.set_filter(status);
  }
  if let Some(order) = sort {
    store.set_sort_order(order);
  }
  if let Some(limit) = limit {
    store.set_items_per_page(limit);
  }
  if let Some(page) = page {
    store.set_page(page);
  }

  commands.load().await?;
  renderer.print_task_table(
    &store.view(),
    &store.snapshot()
  )
}

/// Makes sure `id` is held by the store. Remote mode only keeps one server
/// page, so this walks the pages until the task shows up.
async fn locate(
  commands: &TaskCommands,
  id: TaskId
) -> anyhow::Result<()> {
  commands.load().await?;

  loop {
    let store = commands.store();
    if store
      .tasks()
      .iter()
      .any(|task| task.id == id)
    {
      return Ok(());
    }

    let page =
      store.settings().current_page;
    if store.mode() == GatewayMode::Local
      || page >= store.totals().total_pages
    {
      bail!("No task with id {id}.");
    }

    debug!(id, page, "task not on this page; fetching next");
    commands.change_page(page + 1).await?;
  }
}

fn cmd_theme(
  theme: &mut ThemeState,
  action: Option<ThemeAction>
) -> anyhow::Result<()> {
  match action.unwrap_or(
    ThemeAction::Show
  ) {
    | ThemeAction::Show => {
      let source =
        if theme.has_stored_preference() {
          "saved"
        } else {
          "system"
        };
      println!(
        "{} ({source})",
        theme.current()
      );
    }
    | ThemeAction::Toggle => {
      println!(
        "Theme set to {}.",
        theme.toggle()
      );
    }
  }
  Ok(())
}

fn api_client(
  cfg: &Config,
  session: &Arc<AuthSession>
) -> anyhow::Result<ApiClient> {
  let url = cfg.api_url();
  ApiClient::new(
    &url,
    cfg.api_timeout()?,
    Some(session.clone())
  )
  .with_context(|| {
    format!(
      "failed to set up client for \
       {url}"
    )
  })
}

fn auth_client(
  cfg: &Config,
  session: &Arc<AuthSession>
) -> anyhow::Result<AuthClient> {
  Ok(AuthClient::new(
    api_client(cfg, session)?,
    session.clone()
  ))
}

pub fn build_gateway(
  cfg: &Config,
  storage: Arc<dyn KeyValueStore>,
  session: Arc<AuthSession>
) -> anyhow::Result<Arc<dyn Gateway>> {
  let gateway: Arc<dyn Gateway> =
    match cfg.backend()? {
      | Backend::Local => {
        Arc::new(LocalGateway::new(
          storage
        ))
      }
      | Backend::Remote => {
        let api =
          api_client(cfg, &session)?;
        Arc::new(
          RemoteGateway::new(api)
            .with_toggle_style(
              cfg
                .get_parsed("api.toggle")?
                .unwrap_or_default()
            )
            .with_update_method(
              cfg
                .get_parsed("api.update")?
                .unwrap_or_default()
            )
        )
      }
    };
  info!(mode = ?gateway.mode(), "gateway ready");
  Ok(gateway)
}
