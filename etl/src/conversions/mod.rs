//! Conversions between BSON values and the JSON representation sent to the destination.

pub mod document;
