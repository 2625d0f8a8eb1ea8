// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::session_arc;
use crate::backend::attr::{Attribute, SearchTemplate};
use crate::backend::handle;
use crate::ck;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.7 Object management functions

pub fn find_objects_init(
    session: ck::CK_SESSION_HANDLE,
    template: &SearchTemplate,
) -> Result<()> {
    trace!("find_objects_init() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.find_init(template)
}

pub fn find_objects(
    session: ck::CK_SESSION_HANDLE,
    max_count: usize,
) -> Result<Vec<ck::CK_OBJECT_HANDLE>> {
    trace!("find_objects() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.find_next(max_count)
}

pub fn find_objects_final(session: ck::CK_SESSION_HANDLE) -> Result<()> {
    trace!("find_objects_final() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.find_final()
}

pub fn get_attribute_value(
    session: ck::CK_SESSION_HANDLE,
    object: ck::CK_OBJECT_HANDLE,
    template: &mut [Attribute],
) -> Result<()> {
    trace!("get_attribute_value() called, count={}", template.len());

    let _sarc = session_arc(session)?;
    let object = handle::object(object).ok_or(Error::ObjectHandleInvalid)?;
    object.fill_attr_template(template)
}

pub fn get_object_size(
    session: ck::CK_SESSION_HANDLE,
    object: ck::CK_OBJECT_HANDLE,
) -> Result<ck::CK_ULONG> {
    trace!("get_object_size() called");

    let _sarc = session_arc(session)?;
    // Token objects do not export memory-consumption figures; the call
    // exists for standard compliance.
    handle::object(object)
        .map(|_| ck::CK_UNAVAILABLE_INFORMATION)
        .ok_or(Error::ObjectHandleInvalid)
}
