// Channel pointer arrays - zero-allocation `S**` marshalling
//
// The module ABI takes `S**` input/output arrays. The adapter keeps two
// pointer vectors sized for the module's declared channel counts at
// construction, and only rewrites their contents per block.

use crate::module::abi::Sample;

/// Pre-sized `S**` arrays for one adapter
pub struct ChannelPointers<S> {
    /// Input channel pointers (the module must not write through these)
    input_ptrs: Vec<*mut S>,
    /// Output channel pointers
    output_ptrs: Vec<*mut S>,
    /// Number of input channels
    input_channels: usize,
    /// Number of output channels
    output_channels: usize,
}

impl<S: Sample> ChannelPointers<S> {
    /// Create pointer arrays for a module's declared channel counts
    pub fn new(input_channels: usize, output_channels: usize) -> Self {
        Self {
            input_ptrs: Vec::with_capacity(input_channels),
            output_ptrs: Vec::with_capacity(output_channels),
            input_channels,
            output_channels,
        }
    }

    /// Point the arrays at the host's buffers for this block
    ///
    /// Returns `None` when the host provides fewer channels than declared.
    /// The returned pointers are valid until the next call or until the
    /// borrowed buffers go away.
    pub fn prepare(
        &mut self,
        inputs: &[&[S]],
        outputs: &mut [&mut [S]],
    ) -> Option<(*mut *mut S, *mut *mut S)> {
        if inputs.len() < self.input_channels || outputs.len() < self.output_channels {
            return None;
        }

        // Never grows past the construction capacity, so no allocation here
        self.input_ptrs.clear();
        for buffer in &inputs[..self.input_channels] {
            self.input_ptrs.push(buffer.as_ptr() as *mut S);
        }

        self.output_ptrs.clear();
        for buffer in &mut outputs[..self.output_channels] {
            self.output_ptrs.push(buffer.as_mut_ptr());
        }

        Some((self.input_ptrs.as_mut_ptr(), self.output_ptrs.as_mut_ptr()))
    }

    /// Point only the input array at the host's buffers (for initialize)
    pub fn prepare_inputs(&mut self, inputs: &[&[S]]) -> Option<*mut *mut S> {
        if inputs.len() < self.input_channels {
            return None;
        }

        self.input_ptrs.clear();
        for buffer in &inputs[..self.input_channels] {
            self.input_ptrs.push(buffer.as_ptr() as *mut S);
        }

        Some(self.input_ptrs.as_mut_ptr())
    }

    /// Largest block every declared channel can hold
    pub fn usable_block(&self, inputs: &[&[S]], outputs: &[&mut [S]], requested: usize) -> usize {
        let inputs = inputs.iter().take(self.input_channels).map(|b| b.len());
        let outputs = outputs.iter().take(self.output_channels).map(|b| b.len());
        inputs.chain(outputs).fold(requested, usize::min)
    }

    /// Get input channel count
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Get output channel count
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }
}

/// Write the precision's zero into the first `block` samples of every channel
pub fn silence<S: Sample>(outputs: &mut [&mut [S]], block: usize) {
    for channel in outputs.iter_mut() {
        let len = block.min(channel.len());
        channel[..len].fill(S::ZERO);
    }
}

/// Zero samples `[from, to)` of every channel, clamped to each channel's length
pub fn silence_range<S: Sample>(outputs: &mut [&mut [S]], from: usize, to: usize) {
    for channel in outputs.iter_mut() {
        let end = to.min(channel.len());
        if from < end {
            channel[from..end].fill(S::ZERO);
        }
    }
}

// Safety: the arrays only hold addresses between prepare() and the module
// call on the same thread
unsafe impl<S: Send> Send for ChannelPointers<S> {}
