//! Hand landmark layout.

/// Number of landmarks reported for each hand.
pub const NUM_LANDMARKS: usize = 21;

/// Names for the hand landmarks, in the order the estimator reports them.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Hand features are expressed relative to this landmark.
pub const ANCHOR: LandmarkIdx = LandmarkIdx::Wrist;

/// The wrist to middle knuckle distance is used as the hand's unit length. It is largely
/// independent of the hand pose, since both landmarks sit on the palm.
pub const SCALE_REFERENCE: (LandmarkIdx, LandmarkIdx) =
    (LandmarkIdx::Wrist, LandmarkIdx::MiddleFingerMcp);
