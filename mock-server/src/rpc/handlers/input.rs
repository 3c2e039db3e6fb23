use crate::lock;
use crate::rpc::handler::{dispatch_method, ConnectionHandler, HandlerBookkeeping, MethodSet};
use crate::rpc::{parse_params, RpcResult};
use crate::transport::{JsonRpcRequest, JsonRpcResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMethod {
    ExecuteAction,
    Left,
    Right,
    Up,
    Down,
    Select,
    Back,
    Home,
    ContextMenu,
    Info,
    ShowOsd,
    ShowCodec,
    SendText,
}

impl MethodSet for InputMethod {
    const ALL: &'static [Self] = &[
        InputMethod::ExecuteAction,
        InputMethod::Left,
        InputMethod::Right,
        InputMethod::Up,
        InputMethod::Down,
        InputMethod::Select,
        InputMethod::Back,
        InputMethod::Home,
        InputMethod::ContextMenu,
        InputMethod::Info,
        InputMethod::ShowOsd,
        InputMethod::ShowCodec,
        InputMethod::SendText,
    ];

    fn name(self) -> &'static str {
        match self {
            InputMethod::ExecuteAction => "Input.ExecuteAction",
            InputMethod::Left => "Input.Left",
            InputMethod::Right => "Input.Right",
            InputMethod::Up => "Input.Up",
            InputMethod::Down => "Input.Down",
            InputMethod::Select => "Input.Select",
            InputMethod::Back => "Input.Back",
            InputMethod::Home => "Input.Home",
            InputMethod::ContextMenu => "Input.ContextMenu",
            InputMethod::Info => "Input.Info",
            InputMethod::ShowOsd => "Input.ShowOSD",
            InputMethod::ShowCodec => "Input.ShowCodec",
            InputMethod::SendText => "Input.SendText",
        }
    }
}

/// One key press or text entry the remote sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputAction {
    /// A navigation method such as `Input.Left`, by method name.
    Key(&'static str),
    /// `Input.ExecuteAction` with its action name.
    Action(String),
    /// `Input.SendText` payload and whether it was submitted.
    Text { text: String, done: bool },
}

#[derive(Debug, Deserialize)]
struct ActionParams {
    action: String,
}

#[derive(Debug, Deserialize)]
struct TextParams {
    text: String,
    #[serde(default = "default_done")]
    done: bool,
}

fn default_done() -> bool {
    true
}

/// The `Input.*` namespace. Every accepted input is answered with `"OK"`
/// and recorded for later inspection.
#[derive(Debug, Default)]
pub struct InputHandler {
    books: HandlerBookkeeping,
    actions: Mutex<Vec<InputAction>>,
}

impl InputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<InputAction> {
        lock(&self.actions).clone()
    }

    fn run(&self, method: InputMethod, params: &Value) -> RpcResult<Value> {
        let action = match method {
            InputMethod::ExecuteAction => {
                let params: ActionParams = parse_params(params)?;
                InputAction::Action(params.action)
            }
            InputMethod::SendText => {
                let params: TextParams = parse_params(params)?;
                InputAction::Text {
                    text: params.text,
                    done: params.done,
                }
            }
            key => InputAction::Key(key.name()),
        };
        lock(&self.actions).push(action);
        Ok(json!("OK"))
    }
}

impl ConnectionHandler for InputHandler {
    fn name(&self) -> &'static str {
        "input"
    }

    fn supported_methods(&self) -> Vec<&'static str> {
        InputMethod::names()
    }

    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
        dispatch_method::<InputMethod>(self.name(), &self.books, method, request, |m| {
            Some(self.run(m, &request.params))
        })
    }

    fn bookkeeping(&self) -> &HandlerBookkeeping {
        &self.books
    }

    fn reset(&self) {
        lock(&self.actions).clear();
        self.books.clear();
    }
}
