pub mod airtable;
pub mod backend;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod form;
pub mod model;
pub mod poller;
pub mod qa;
pub mod review;
pub mod shell;
pub mod submit;
pub mod webhook;
