use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backends::{parse_args, parse_scenario, unknown_function, Backend};
use crate::functions::{json_schema_for, FunctionDefinition, FunctionParameter};
use crate::RunnerError;

const CLASS_NAME: &str = "TicketAPI";

static FUNCTIONS: Lazy<Vec<FunctionDefinition>> = Lazy::new(|| {
    let by_id = || FunctionParameter::new("ticket_id", json_schema_for::<u64>());
    vec![
        FunctionDefinition::new("create_ticket")
            .with_description("Open a new support ticket.")
            .with_parameter(FunctionParameter::new("title", json_schema_for::<String>()))
            .with_parameter(
                FunctionParameter::new("description", json_schema_for::<String>())
                    .with_default(json!("")),
            )
            .with_parameter(
                FunctionParameter::new("priority", json_schema_for::<u8>())
                    .with_description("1 (lowest) to 5 (highest).")
                    .with_default(json!(1)),
            ),
        FunctionDefinition::new("get_ticket")
            .with_description("Fetch a ticket by id.")
            .with_parameter(by_id()),
        FunctionDefinition::new("close_ticket")
            .with_description("Close a ticket.")
            .with_parameter(by_id()),
        FunctionDefinition::new("resolve_ticket")
            .with_description("Mark a ticket resolved with a resolution note.")
            .with_parameter(by_id())
            .with_parameter(FunctionParameter::new("resolution", json_schema_for::<String>())),
    ]
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ticket {
    id: u64,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    resolution: Option<String>,
}

fn default_status() -> String {
    "Open".to_string()
}

fn default_priority() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
struct TicketScenario {
    #[serde(default)]
    ticket_queue: Vec<Ticket>,
    #[serde(default = "default_counter")]
    ticket_counter: u64,
}

impl Default for TicketScenario {
    fn default() -> Self {
        Self {
            ticket_queue: Vec::new(),
            ticket_counter: default_counter(),
        }
    }
}

fn default_counter() -> u64 {
    1
}

#[derive(Deserialize)]
struct CreateArgs {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_priority")]
    priority: u8,
}

#[derive(Deserialize)]
struct IdArgs {
    ticket_id: u64,
}

#[derive(Deserialize)]
struct ResolveArgs {
    ticket_id: u64,
    resolution: String,
}

/// Support ticket queue.
#[derive(Debug)]
pub struct TicketApi {
    ticket_queue: Vec<Ticket>,
    ticket_counter: u64,
}

impl TicketApi {
    pub fn new() -> Self {
        Self {
            ticket_queue: Vec::new(),
            ticket_counter: default_counter(),
        }
    }

    fn find_mut(&mut self, id: u64) -> Option<&mut Ticket> {
        self.ticket_queue.iter_mut().find(|ticket| ticket.id == id)
    }

    fn create(&mut self, args: CreateArgs) -> Result<Value, RunnerError> {
        if !(1..=5).contains(&args.priority) {
            return Ok(json!({ "error": "Invalid priority. Priority must be between 1 and 5." }));
        }
        let Some(next_counter) = self.ticket_counter.checked_add(1) else {
            return Ok(json!({ "error": "Ticket ID space exhausted." }));
        };
        let ticket = Ticket {
            id: self.ticket_counter,
            title: args.title,
            description: args.description,
            status: default_status(),
            priority: args.priority,
            resolution: None,
        };
        self.ticket_counter = next_counter;
        let created = serde_json::to_value(&ticket)?;
        self.ticket_queue.push(ticket);
        Ok(created)
    }

    fn get(&self, args: IdArgs) -> Result<Value, RunnerError> {
        match self.ticket_queue.iter().find(|ticket| ticket.id == args.ticket_id) {
            Some(ticket) => Ok(serde_json::to_value(ticket)?),
            None => Ok(not_found(args.ticket_id)),
        }
    }

    fn close(&mut self, args: IdArgs) -> Result<Value, RunnerError> {
        let id = args.ticket_id;
        let Some(ticket) = self.find_mut(id) else {
            return Ok(not_found(id));
        };
        if ticket.status == "Closed" {
            return Ok(json!({ "error": format!("Ticket with ID {id} is already closed.") }));
        }
        ticket.status = "Closed".to_string();
        Ok(json!({ "status": format!("Ticket {id} has been closed successfully.") }))
    }

    fn resolve(&mut self, args: ResolveArgs) -> Result<Value, RunnerError> {
        let id = args.ticket_id;
        let Some(ticket) = self.find_mut(id) else {
            return Ok(not_found(id));
        };
        ticket.status = "Resolved".to_string();
        ticket.resolution = Some(args.resolution);
        Ok(json!({ "status": format!("Ticket {id} has been resolved successfully.") }))
    }
}

impl Default for TicketApi {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for TicketApi {
    fn class_name(&self) -> &'static str {
        CLASS_NAME
    }

    fn functions(&self) -> &'static [FunctionDefinition] {
        &FUNCTIONS
    }

    fn load_scenario(&mut self, config: &Value, _long_context: bool) -> Result<(), RunnerError> {
        let scenario: TicketScenario = parse_scenario(CLASS_NAME, config)?;
        let mut next_free = 1;
        for ticket in &scenario.ticket_queue {
            let after = ticket.id.checked_add(1).ok_or_else(|| RunnerError::ScenarioLoad {
                class: CLASS_NAME.to_string(),
                message: format!("ticket id {} leaves no room for new tickets", ticket.id),
            })?;
            next_free = next_free.max(after);
        }
        self.ticket_counter = scenario.ticket_counter.max(next_free);
        self.ticket_queue = scenario.ticket_queue;
        Ok(())
    }

    fn invoke(&mut self, function: &str, arguments: &Value) -> Result<Value, RunnerError> {
        match function {
            "create_ticket" => self.create(parse_args(function, arguments)?),
            "get_ticket" => self.get(parse_args(function, arguments)?),
            "close_ticket" => self.close(parse_args(function, arguments)?),
            "resolve_ticket" => self.resolve(parse_args(function, arguments)?),
            other => Err(unknown_function(CLASS_NAME, other)),
        }
    }

    fn state(&self) -> Value {
        json!({
            "ticket_queue": self.ticket_queue,
            "ticket_counter": self.ticket_counter,
        })
    }
}

fn not_found(id: u64) -> Value {
    json!({ "error": format!("Ticket with ID {id} not found.") })
}
