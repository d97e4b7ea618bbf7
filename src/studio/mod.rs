//! Veo Studio: batch video generation back-end.
//!
//! ## Overview
//!
//! A user uploads authentication cookies and a file of prompts. The studio
//! verifies the cookies, then drives the remote generation service one
//! prompt at a time, downloading each video into local storage while pollers
//! and WebSocket clients watch progress.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ BatchOrchestrator::start()             │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (supervised sequential run)    │
//!                       │         │                                        │
//!                       │         │ GenerationClient::submit() / fetch()   │
//!                       │         v                                        │
//!                       │  client.rs  (HttpGenerationClient)               │
//!                       │         │                                        │
//!                       │         │ AssetSink::persist()                   │
//!                       │         v                                        │
//!                       │  storage.rs  (DirectorySink)                     │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `credentials` | Cookie parsing, saving, `SessionVerifier`               |
//! | `prompts`     | `PromptSet` parsing and prompt enrichment               |
//! | `settings`    | Validated `Settings` (aspect ratio, duration, resolution)|
//! | `models`      | `JobRecord`, `RunState`, snapshots, transition rules    |
//! | `status`      | `StatusReporter`: copy-on-read views of the run         |
//! | `ws`          | `WsMessage` enum + `broadcast_message()` helper         |

pub mod api;
pub mod client;
pub mod credentials;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod server;
pub mod settings;
pub mod status;
pub mod storage;
pub mod ws;
