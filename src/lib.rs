//! # fa-rs: Forest Automata in Rust
//!
//! **`fa-rs`** is a library for representing sets of heap shapes as **forest automata**
//! and computing fixpoints over them, as used by shape analysis of pointer programs.
//!
//! ## What is a forest automaton?
//!
//! A heap is cut at its *cutpoints* (nodes referenced from variables or from more than
//! one place) into a tuple of trees. A forest automaton keeps one tree automaton per
//! tree, and leaves of those trees refer to other roots by index. Recurring sub-shapes
//! (list segments, parent pointers) are *folded* into **nested boxes**: labels which
//! themselves stand for a forest automaton, so that unbounded structures get a finite
//! representation.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: Labels, boxes and transitions are interned by the
//!   [`BoxMan`][crate::boxman::BoxMan] manager and compared by id.
//! - **Tree Automata**: Union, reachability trimming, simulation-based reduction and
//!   language inclusion over shared transition storage.
//! - **Folding and Unfolding**: Discovery of nested boxes on a snapshot and their expansion back.
//! - **Abstraction**: Finite height abstraction and fixpoint computation at loop heads.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use fa_rs::boxman::BoxMan;
//! use fa_rs::config::AnalysisConfig;
//! use fa_rs::data::{Data, SelData};
//! use fa_rs::fixpoint::{Fixpoint, FixpointKind};
//! use fa_rs::forest::Fae;
//!
//! // 1. Initialize the manager
//! let boxman = Rc::new(BoxMan::default());
//!
//! // 2. Build a two-node cycle `x -> a <-> b`
//! let sels = [SelData::new(0, 8, 0, "next"), SelData::new(8, 8, 0, "data")];
//! let mut fae = Fae::new(boxman.clone());
//! let a = fae.node_create(&sels, None);
//! let b = fae.node_create(&sels, None);
//! fae.node_modify(a, 0, Data::reference(b)).unwrap();
//! fae.node_modify(b, 0, Data::reference(a)).unwrap();
//! fae.var_push(Data::reference(a));
//!
//! // 3. The first visit of a loop head extends the fixpoint...
//! let mut fixpoint = Fixpoint::new(FixpointKind::Fix, boxman.clone(), AnalysisConfig::default());
//! assert!(!fixpoint.execute(&fae).unwrap().is_hit());
//! assert_eq!(boxman.box_count(), 1);
//!
//! // 4. ...and the same snapshot is covered afterwards
//! assert!(fixpoint.execute(&fae).unwrap().is_hit());
//! ```
//!
//! ## Core Components
//!
//! - **[`treeaut`]**: Tree automata and their algorithms.
//! - **[`boxman`]**: The label and box manager.
//! - **[`forest`]**: Snapshots ([`Fae`][crate::forest::Fae]) and the operations in [`vm`].
//! - **[`folding`]**, **[`unfolding`]**, **[`normalization`]**, **[`splitting`]**: Transformations between equivalent snapshots.
//! - **[`fixpoint`]**: The abstraction and fixpoint driver.

pub mod abstraction;
pub mod boxman;
pub mod config;
pub mod connection;
pub mod data;
pub mod debug;
pub mod error;
pub mod fixpoint;
pub mod folding;
pub mod forest;
pub mod inclusion;
pub mod label;
pub mod nested_box;
pub mod normalization;
pub mod relation;
pub mod simulation;
pub mod splitting;
pub mod table;
pub mod term;
pub mod treeaut;
pub mod types;
pub mod ufae;
pub mod unfolding;
pub mod utils;
pub mod vm;
