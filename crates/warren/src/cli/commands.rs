//! CLI command definitions using `clap`

use clap::{value_parser, Arg, ArgAction, Command as ClapCommand};

pub fn after_help_text(examples: &[&str]) -> String {
    let mut text = String::from("EXAMPLES:\n");
    for example in examples {
        text.push_str("  ");
        text.push_str(example);
        text.push('\n');
    }
    text
}

fn id_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).required(true).help(help)
}

pub fn build_cli() -> ClapCommand {
    ClapCommand::new("warren")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run coding agents in isolated worktrees, sessions and containers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
        .arg(
            Arg::new("state-db")
                .long("state-db")
                .global(true)
                .value_name("PATH")
                .help("State database to use instead of the configured one"),
        )
        .subcommand(cmd_project())
        .subcommand(cmd_agent())
        .subcommand(cmd_ports())
        .subcommand(cmd_activity())
        .subcommand(cmd_conflicts())
        .subcommand(
            ClapCommand::new("status").about("Show agent, project and port counts"),
        )
        .subcommand(cmd_serve())
}

pub fn cmd_project() -> ClapCommand {
    ClapCommand::new("project")
        .about("Manage projects")
        .subcommand_required(true)
        .subcommand(
            ClapCommand::new("create")
                .about("Register a directory as a project and reserve its port range")
                .arg(Arg::new("path").required(true).help("Project directory"))
                .arg(
                    Arg::new("name")
                        .long("name")
                        .help("Project name (defaults to the directory name)"),
                )
                .arg(
                    Arg::new("ports")
                        .long("ports")
                        .value_name("START-END")
                        .help("Exact port range to reserve"),
                ),
        )
        .subcommand(ClapCommand::new("list").about("List projects"))
        .subcommand(
            ClapCommand::new("show")
                .about("Show one project")
                .arg(id_arg("id", "Project id")),
        )
        .subcommand(
            ClapCommand::new("stop")
                .about("Stop every agent of a project")
                .arg(id_arg("id", "Project id")),
        )
        .subcommand(
            ClapCommand::new("rm")
                .about("Remove a project that has no agents left")
                .arg(id_arg("id", "Project id")),
        )
        .subcommand(
            ClapCommand::new("add-agent")
                .about("Attach an existing agent to a project")
                .arg(id_arg("project", "Project id"))
                .arg(id_arg("agent", "Agent id")),
        )
        .subcommand(
            ClapCommand::new("remove-agent")
                .about("Detach an agent from its project")
                .arg(id_arg("project", "Project id"))
                .arg(id_arg("agent", "Agent id")),
        )
        .after_help(after_help_text(&[
            "warren project create ~/src/shop --name shop",
            "warren project create . --ports 4000-4009",
            "warren project rm 1f3a9c2e --json",
        ]))
}

pub fn cmd_agent() -> ClapCommand {
    ClapCommand::new("agent")
        .about("Manage agents")
        .subcommand_required(true)
        .subcommand(
            ClapCommand::new("create")
                .about("Create a worktree and session for a branch")
                .arg(Arg::new("branch").required(true).help("Branch to check out"))
                .arg(Arg::new("id").long("id").help("Agent id (derived from the branch otherwise)"))
                .arg(Arg::new("project").long("project").help("Project to create the agent in"))
                .arg(
                    Arg::new("no-auto-accept")
                        .long("no-auto-accept")
                        .action(ArgAction::SetTrue)
                        .help("Ask before applying agent edits"),
                )
                .arg(
                    Arg::new("container")
                        .long("container")
                        .action(ArgAction::SetTrue)
                        .help("Also run the agent in a container"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .value_parser(value_parser!(u64))
                        .help("Give up on creation after this many seconds"),
                ),
        )
        .subcommand(
            ClapCommand::new("list")
                .about("List agents")
                .arg(Arg::new("project").long("project").help("Only agents of this project"))
                .arg(
                    Arg::new("status")
                        .long("status")
                        .help("Only agents in this status (CREATED, RUNNING, STOPPED, ERROR)"),
                ),
        )
        .subcommand(
            ClapCommand::new("show")
                .about("Show one agent")
                .arg(id_arg("id", "Agent id")),
        )
        .subcommand(
            ClapCommand::new("start")
                .about("Start a stopped agent")
                .arg(id_arg("id", "Agent id")),
        )
        .subcommand(
            ClapCommand::new("stop")
                .about("Stop a running agent")
                .arg(id_arg("id", "Agent id")),
        )
        .subcommand(
            ClapCommand::new("rm")
                .about("Remove an agent and release its resources")
                .arg(id_arg("id", "Agent id"))
                .arg(
                    Arg::new("keep-worktree")
                        .long("keep-worktree")
                        .action(ArgAction::SetTrue)
                        .help("Leave the git worktree on disk"),
                ),
        )
        .after_help(after_help_text(&[
            "warren agent create feature/login --project 1f3a9c2e",
            "warren agent create fix-42 --container --timeout 60",
            "warren agent rm login-7d2c --keep-worktree",
        ]))
}

pub fn cmd_ports() -> ClapCommand {
    ClapCommand::new("ports")
        .about("Inspect and manage port allocations")
        .subcommand_required(true)
        .subcommand(
            ClapCommand::new("allocate")
                .about("Allocate one more port for a project")
                .arg(id_arg("project", "Project id"))
                .arg(Arg::new("service").long("service").help("Service label"))
                .arg(
                    Arg::new("preferred")
                        .long("preferred")
                        .value_parser(value_parser!(u16))
                        .help("Port to try first"),
                ),
        )
        .subcommand(
            ClapCommand::new("release")
                .about("Release every port of a project")
                .arg(id_arg("project", "Project id")),
        )
        .subcommand(
            ClapCommand::new("list")
                .about("List the ports of a project")
                .arg(id_arg("project", "Project id")),
        )
}

pub fn cmd_activity() -> ClapCommand {
    ClapCommand::new("activity")
        .about("Show the command log of both control surfaces")
        .arg(Arg::new("command").long("command").help("Only this command name"))
        .arg(
            Arg::new("source")
                .long("source")
                .help("Only commands from CLI or GUI"),
        )
        .arg(Arg::new("session").long("session").help("Only this session id"))
        .arg(
            Arg::new("since")
                .long("since")
                .value_name("RFC3339")
                .help("Only entries at or after this time"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_parser(value_parser!(usize))
                .help("At most this many entries, oldest first"),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .action(ArgAction::SetTrue)
                .help("Print counts instead of entries"),
        )
}

pub fn cmd_conflicts() -> ClapCommand {
    ClapCommand::new("conflicts")
        .about("List or resolve detected conflicts")
        .arg(
            Arg::new("unresolved")
                .long("unresolved")
                .action(ArgAction::SetTrue)
                .help("Only conflicts that are not resolved yet"),
        )
        .arg(Arg::new("severity").long("severity").help("LOW or HIGH"))
        .arg(
            Arg::new("since")
                .long("since")
                .value_name("RFC3339")
                .help("Only conflicts detected at or after this time"),
        )
        .subcommand(
            ClapCommand::new("resolve")
                .about("Mark a conflict resolved")
                .arg(id_arg("id", "Conflict id"))
                .arg(Arg::new("note").long("note").help("How it was resolved")),
        )
}

pub fn cmd_serve() -> ClapCommand {
    ClapCommand::new("serve")
        .about("Run the dashboard server")
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Listen address (defaults to server.bind)"),
        )
}
