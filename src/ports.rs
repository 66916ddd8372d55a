//! Structured views over the flat inbound/outbound `f64` buffers.
//!
//! Mapping borrows the caller's buffer and never copies. 2-D ports are
//! row-major.

use crate::error::AccessError;
use crate::layout::{PortLayout, PortSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PortMapper {
    layout: Arc<PortLayout>,
}

impl PortMapper {
    pub fn new(layout: Arc<PortLayout>) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Arc<PortLayout> {
        &self.layout
    }

    /// Load-time check of the buffer sizes the host will pass on each tick.
    pub fn bind(&self, inbound_len: usize, outbound_len: usize) -> Result<(), AccessError> {
        self.layout.inbound().validate(inbound_len)?;
        self.layout.outbound().validate(outbound_len)
    }

    #[inline]
    pub fn map_inbound<'a>(&'a self, buf: &'a [f64]) -> Result<InboundPorts<'a>, AccessError> {
        let set = self.layout.inbound();
        set.validate(buf.len())?;
        Ok(InboundPorts { set, buf })
    }

    #[inline]
    pub fn map_outbound<'a>(
        &'a self,
        buf: &'a mut [f64],
    ) -> Result<OutboundPorts<'a>, AccessError> {
        let set = self.layout.outbound();
        set.validate(buf.len())?;
        Ok(OutboundPorts { set, buf })
    }
}

/// Row-major matrix view of a 2-D port.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    rows: usize,
    cols: usize,
    data: &'a [f64],
}

impl<'a> MatrixView<'a> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[row * self.cols + col])
    }

    pub fn row(&self, row: usize) -> Option<&'a [f64]> {
        let data = self.data;
        (row < self.rows).then(|| &data[row * self.cols..(row + 1) * self.cols])
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }
}

#[derive(Debug)]
pub struct MatrixViewMut<'a> {
    rows: usize,
    cols: usize,
    data: &'a mut [f64],
}

impl MatrixViewMut<'_> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[row * self.cols + col])
    }

    /// Returns false if `(row, col)` is outside the port.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        self.data[row * self.cols + col] = value;
        true
    }

    pub fn row_mut(&mut self, row: usize) -> Option<&mut [f64]> {
        if row >= self.rows {
            return None;
        }
        Some(&mut self.data[row * self.cols..(row + 1) * self.cols])
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut *self.data
    }
}

/// Read-only structured view of the inbound buffer.
#[derive(Debug, Clone, Copy)]
pub struct InboundPorts<'a> {
    set: &'a PortSet,
    buf: &'a [f64],
}

impl<'a> InboundPorts<'a> {
    /// Port `index` in declaration order.
    #[inline(always)]
    pub fn port(&self, index: usize) -> Option<&'a [f64]> {
        let buf = self.buf;
        let desc = self.set.port(index)?;
        Some(&buf[desc.range()])
    }

    pub fn vector(&self, name: &str) -> Option<&'a [f64]> {
        self.port(self.set.index_of(name)?)
    }

    /// First element of the named port.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.vector(name)?.first().copied()
    }

    pub fn matrix(&self, name: &str) -> Option<MatrixView<'a>> {
        let buf = self.buf;
        let desc = self.set.find(name)?;
        Some(MatrixView {
            rows: desc.dims().rows as usize,
            cols: desc.dims().cols as usize,
            data: &buf[desc.range()],
        })
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.buf
    }
}

/// Writable structured view of the outbound buffer.
#[derive(Debug)]
pub struct OutboundPorts<'a> {
    set: &'a PortSet,
    buf: &'a mut [f64],
}

impl OutboundPorts<'_> {
    #[inline(always)]
    pub fn port_mut(&mut self, index: usize) -> Option<&mut [f64]> {
        let desc = self.set.port(index)?;
        Some(&mut self.buf[desc.range()])
    }

    pub fn vector_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        let index = self.set.index_of(name)?;
        self.port_mut(index)
    }

    pub fn scalar_mut(&mut self, name: &str) -> Option<&mut f64> {
        self.vector_mut(name)?.first_mut()
    }

    pub fn matrix_mut(&mut self, name: &str) -> Option<MatrixViewMut<'_>> {
        let desc = self.set.find(name)?;
        Some(MatrixViewMut {
            rows: desc.dims().rows as usize,
            cols: desc.dims().cols as usize,
            data: &mut self.buf[desc.range()],
        })
    }

    pub fn as_slice(&self) -> &[f64] {
        &*self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut *self.buf
    }
}
